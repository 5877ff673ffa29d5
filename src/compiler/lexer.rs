//! Lexical Analysis
//!
//! Compiler pass that tokenizes C source code, producing a sequence of
//! typed tokens with source positions. Comments are stripped here;
//! `#include` directives are recognized and surface as a dedicated token
//! kind for the preprocessing pass to resolve.

use std::fmt;

use crate::error::{ErrorCollector, Pos};

/// Keywords the compiler honors from the C11 set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Keyword {
    Bool,
    Break,
    Char,
    Const,
    Continue,
    Do,
    Else,
    Enum,
    Extern,
    For,
    If,
    Int,
    Long,
    Return,
    Short,
    Signed,
    Sizeof,
    Static,
    Struct,
    Typedef,
    Union,
    Unsigned,
    Void,
    While,
}

impl Keyword {
    fn from_str(s: &str) -> Option<Keyword> {
        Some(match s {
            "_Bool" => Keyword::Bool,
            "break" => Keyword::Break,
            "char" => Keyword::Char,
            "const" => Keyword::Const,
            "continue" => Keyword::Continue,
            "do" => Keyword::Do,
            "else" => Keyword::Else,
            "enum" => Keyword::Enum,
            "extern" => Keyword::Extern,
            "for" => Keyword::For,
            "if" => Keyword::If,
            "int" => Keyword::Int,
            "long" => Keyword::Long,
            "return" => Keyword::Return,
            "short" => Keyword::Short,
            "signed" => Keyword::Signed,
            "sizeof" => Keyword::Sizeof,
            "static" => Keyword::Static,
            "struct" => Keyword::Struct,
            "typedef" => Keyword::Typedef,
            "union" => Keyword::Union,
            "unsigned" => Keyword::Unsigned,
            "void" => Keyword::Void,
            "while" => Keyword::While,
            _ => return None,
        })
    }
}

/// Punctuation tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Punct {
    ParenOpen,
    ParenClose,
    BraceOpen,
    BraceClose,
    BrackOpen,
    BrackClose,
    Semicolon,
    Comma,
    Dot,
    Arrow,
    Amp,
    Star,
    Plus,
    Minus,
    Tilde,
    Bang,
    Slash,
    Percent,
    LShift,
    RShift,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    BangEq,
    Caret,
    Pipe,
    AmpAmp,
    PipePipe,
    Question,
    Colon,
    Eq,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    AmpEq,
    PipeEq,
    CaretEq,
    LShiftEq,
    RShiftEq,
    PlusPlus,
    MinusMinus,
}

/// Integer literal suffix, deciding the literal's type together with its
/// magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntSuffix {
    /// No suffix.
    None,
    /// `u`.
    Unsigned,
    /// `l`.
    Long,
    /// `ul` or `lu`.
    UnsignedLong,
}

/// Types of lexical elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// A reserved word.
    Keyword(Keyword),
    /// An ordinary identifier.
    Ident(String),
    /// An integer constant with its suffix.
    IntLit {
        /// Numeric value (two's complement for out-of-range unsigned).
        value: i64,
        /// Parsed suffix.
        suffix: IntSuffix,
    },
    /// A character constant, already unescaped.
    CharLit(u8),
    /// A string literal, already unescaped, without the terminating NUL.
    StrLit(Vec<u8>),
    /// A punctuation token.
    Punct(Punct),
    /// An `#include` directive, left for the preprocessor to resolve.
    Include {
        /// Header path as written.
        path: String,
        /// `true` for `<...>`, `false` for `"..."`.
        angled: bool,
    },
    /// End of the token stream.
    Eof,
}

/// Minimal lexical element of a translation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Token type.
    pub kind: TokenKind,
    /// Location of the token's first character.
    pub pos: Pos,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Keyword(k) => write!(f, "keyword '{k:?}'"),
            TokenKind::Ident(s) => write!(f, "identifier '{s}'"),
            TokenKind::IntLit { value, .. } => write!(f, "constant '{value}'"),
            TokenKind::CharLit(c) => write!(f, "character constant '{}'", *c as char),
            TokenKind::StrLit(_) => write!(f, "string literal"),
            TokenKind::Punct(p) => write!(f, "'{p:?}'"),
            TokenKind::Include { path, .. } => write!(f, "#include '{path}'"),
            TokenKind::Eof => write!(f, "end of file"),
        }
    }
}

/// Byte-cursor lexer over one source file.
pub struct Lexer<'a> {
    src: &'a [u8],
    file: &'static str,
    cur: usize,
    // Index just past the last newline, used to compute columns.
    bol: usize,
    line: u32,
}

impl<'a> Lexer<'a> {
    /// Returns a lexer over `src`, attributing positions to `file`.
    pub fn new(file: &'static str, src: &'a [u8]) -> Self {
        Lexer { src, file, cur: 0, bol: 0, line: 1 }
    }

    /// Tokenizes the whole file. Lexical errors are recorded and the
    /// offending character skipped, so one pass reports every problem.
    /// The returned stream always ends with an EOF token.
    pub fn lex(mut self, errors: &mut ErrorCollector) -> Vec<Token> {
        let mut tokens = Vec::new();

        while self.has_next() {
            let pos = self.pos();

            match self.first() {
                b'\n' => {
                    self.cur += 1;
                    self.bol = self.cur;
                    self.line += 1;
                }
                b if b.is_ascii_whitespace() => self.cur += 1,
                // Line and block comments are stripped here.
                b'/' if self.second() == Some(b'/') => {
                    while self.has_next() && self.first() != b'\n' {
                        self.cur += 1;
                    }
                }
                b'/' if self.second() == Some(b'*') => {
                    self.cur += 2;
                    let mut closed = false;
                    while self.has_next() {
                        if self.first() == b'\n' {
                            self.cur += 1;
                            self.bol = self.cur;
                            self.line += 1;
                        } else if self.first() == b'*' && self.second() == Some(b'/') {
                            self.cur += 2;
                            closed = true;
                            break;
                        } else {
                            self.cur += 1;
                        }
                    }
                    if !closed {
                        errors.error("unterminated block comment", pos);
                    }
                }
                b'#' => {
                    if let Some(tok) = self.lex_directive(pos, errors) {
                        tokens.push(tok);
                    }
                }
                b'0'..=b'9' => tokens.push(self.lex_number(pos, errors)),
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                    tokens.push(self.lex_word(pos));
                }
                b'\'' => {
                    if let Some(tok) = self.lex_char(pos, errors) {
                        tokens.push(tok);
                    }
                }
                b'"' => {
                    if let Some(tok) = self.lex_string(pos, errors) {
                        tokens.push(tok);
                    }
                }
                _ => {
                    if let Some(tok) = self.lex_punct(pos, errors) {
                        tokens.push(tok);
                    }
                }
            }
        }

        tokens.push(Token { kind: TokenKind::Eof, pos: self.pos() });
        tokens
    }

    fn pos(&self) -> Pos {
        Pos {
            file: self.file,
            line: self.line,
            col: (self.cur - self.bol) as u32 + 1,
        }
    }

    #[inline]
    fn first(&self) -> u8 {
        self.src[self.cur]
    }

    #[inline]
    fn second(&self) -> Option<u8> {
        self.src.get(self.cur + 1).copied()
    }

    #[inline]
    fn has_next(&self) -> bool {
        self.cur < self.src.len()
    }

    fn take_word(&mut self) -> &'a str {
        let start = self.cur;
        while self.has_next()
            && (self.first().is_ascii_alphanumeric() || self.first() == b'_')
        {
            self.cur += 1;
        }
        std::str::from_utf8(&self.src[start..self.cur])
            .expect("source should only contain ASCII bytes")
    }

    fn lex_word(&mut self, pos: Pos) -> Token {
        let word = self.take_word();
        let kind = match Keyword::from_str(word) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Ident(word.to_owned()),
        };
        Token { kind, pos }
    }

    fn lex_number(&mut self, pos: Pos, errors: &mut ErrorCollector) -> Token {
        let word = self.take_word();

        // Split the numeric part from a trailing suffix.
        let digits_end = if word.starts_with("0x") || word.starts_with("0X") {
            2 + word[2..]
                .find(|c: char| !c.is_ascii_hexdigit())
                .unwrap_or(word.len() - 2)
        } else {
            word.find(|c: char| !c.is_ascii_digit()).unwrap_or(word.len())
        };
        let (digits, rest) = word.split_at(digits_end);

        let suffix = match rest.to_ascii_lowercase().as_str() {
            "" => IntSuffix::None,
            "u" => IntSuffix::Unsigned,
            "l" | "ll" => IntSuffix::Long,
            "ul" | "lu" | "ull" | "llu" => IntSuffix::UnsignedLong,
            _ => {
                errors.error(
                    format!("invalid suffix '{rest}' on integer constant"),
                    pos,
                );
                IntSuffix::None
            }
        };

        let parsed = if let Some(hex) = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
        {
            u64::from_str_radix(hex, 16)
        } else if digits.len() > 1 && digits.starts_with('0') {
            u64::from_str_radix(&digits[1..], 8)
        } else {
            digits.parse::<u64>()
        };

        let value = match parsed {
            Ok(v) => v as i64,
            Err(_) => {
                errors.error(
                    format!("invalid integer constant '{word}'"),
                    pos,
                );
                0
            }
        };

        Token { kind: TokenKind::IntLit { value, suffix }, pos }
    }

    /// Unescapes the character after a backslash.
    fn lex_escape(&mut self, pos: Pos, errors: &mut ErrorCollector) -> u8 {
        // The backslash has been consumed.
        if !self.has_next() {
            errors.error("bad escape sequence", pos);
            return 0;
        }
        let c = self.first();
        self.cur += 1;
        match c {
            b'n' => b'\n',
            b't' => b'\t',
            b'r' => b'\r',
            b'0' => 0,
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0c,
            b'v' => 0x0b,
            b'\\' => b'\\',
            b'\'' => b'\'',
            b'"' => b'"',
            b'?' => b'?',
            _ => {
                errors.error(
                    format!("bad escape sequence '\\{}'", c as char),
                    pos,
                );
                c
            }
        }
    }

    fn lex_char(&mut self, pos: Pos, errors: &mut ErrorCollector) -> Option<Token> {
        // Skip the opening quote.
        self.cur += 1;

        let value = match self.has_next().then(|| self.first()) {
            None | Some(b'\n') | Some(b'\'') => {
                errors.error("empty or unterminated character constant", pos);
                self.cur += usize::from(self.has_next());
                return None;
            }
            Some(b'\\') => {
                self.cur += 1;
                self.lex_escape(pos, errors)
            }
            Some(c) => {
                self.cur += 1;
                c
            }
        };

        if self.has_next() && self.first() == b'\'' {
            self.cur += 1;
            Some(Token { kind: TokenKind::CharLit(value), pos })
        } else {
            errors.error("unterminated character constant", pos);
            None
        }
    }

    fn lex_string(&mut self, pos: Pos, errors: &mut ErrorCollector) -> Option<Token> {
        // Skip the opening quote.
        self.cur += 1;
        let mut bytes = Vec::new();

        while self.has_next() {
            match self.first() {
                b'"' => {
                    self.cur += 1;
                    return Some(Token { kind: TokenKind::StrLit(bytes), pos });
                }
                b'\n' => break,
                b'\\' => {
                    self.cur += 1;
                    bytes.push(self.lex_escape(pos, errors));
                }
                c => {
                    self.cur += 1;
                    bytes.push(c);
                }
            }
        }

        errors.error("unterminated string literal", pos);
        None
    }

    fn lex_directive(
        &mut self,
        pos: Pos,
        errors: &mut ErrorCollector,
    ) -> Option<Token> {
        // Skip '#' and horizontal whitespace before the directive name.
        self.cur += 1;
        while self.has_next() && (self.first() == b' ' || self.first() == b'\t') {
            self.cur += 1;
        }

        let name = self.take_word().to_owned();
        if name != "include" {
            errors.error(
                format!("unsupported preprocessor directive '#{name}'"),
                pos,
            );
            // Discard the rest of the directive line.
            while self.has_next() && self.first() != b'\n' {
                self.cur += 1;
            }
            return None;
        }

        while self.has_next() && (self.first() == b' ' || self.first() == b'\t') {
            self.cur += 1;
        }

        let (closing, angled) = match self.has_next().then(|| self.first()) {
            Some(b'<') => (b'>', true),
            Some(b'"') => (b'"', false),
            _ => {
                errors.error("expected \"FILENAME\" or <FILENAME>", pos);
                return None;
            }
        };

        self.cur += 1;
        let start = self.cur;
        while self.has_next() && self.first() != closing && self.first() != b'\n' {
            self.cur += 1;
        }

        if !self.has_next() || self.first() != closing {
            errors.error("unterminated include path", pos);
            return None;
        }

        let path = std::str::from_utf8(&self.src[start..self.cur])
            .expect("source should only contain ASCII bytes")
            .to_owned();
        self.cur += 1;

        Some(Token { kind: TokenKind::Include { path, angled }, pos })
    }

    fn lex_punct(&mut self, pos: Pos, errors: &mut ErrorCollector) -> Option<Token> {
        use Punct::*;

        let rest = &self.src[self.cur..];
        // Longest match first.
        let table: [(&[u8], Punct); 45] = [
            (b"<<=", LShiftEq),
            (b">>=", RShiftEq),
            (b"->", Arrow),
            (b"++", PlusPlus),
            (b"--", MinusMinus),
            (b"<<", LShift),
            (b">>", RShift),
            (b"<=", Le),
            (b">=", Ge),
            (b"==", EqEq),
            (b"!=", BangEq),
            (b"&&", AmpAmp),
            (b"||", PipePipe),
            (b"+=", PlusEq),
            (b"-=", MinusEq),
            (b"*=", StarEq),
            (b"/=", SlashEq),
            (b"%=", PercentEq),
            (b"&=", AmpEq),
            (b"|=", PipeEq),
            (b"^=", CaretEq),
            (b"(", ParenOpen),
            (b")", ParenClose),
            (b"{", BraceOpen),
            (b"}", BraceClose),
            (b"[", BrackOpen),
            (b"]", BrackClose),
            (b";", Semicolon),
            (b",", Comma),
            (b".", Dot),
            (b"&", Amp),
            (b"*", Star),
            (b"+", Plus),
            (b"-", Minus),
            (b"~", Tilde),
            (b"!", Bang),
            (b"/", Slash),
            (b"%", Percent),
            (b"<", Lt),
            (b">", Gt),
            (b"^", Caret),
            (b"|", Pipe),
            (b"?", Question),
            (b":", Colon),
            (b"=", Eq),
        ];

        for (text, punct) in table {
            if rest.starts_with(text) {
                self.cur += text.len();
                return Some(Token { kind: TokenKind::Punct(punct), pos });
            }
        }

        errors.error(
            format!("invalid character: '{}'", self.first() as char),
            pos,
        );
        self.cur += 1;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(src: &[u8]) -> Vec<Token> {
        let mut errors = ErrorCollector::new();
        let tokens = Lexer::new("test.c", src).lex(&mut errors);
        assert!(errors.ok(), "unexpected errors: {:?}", errors.messages());
        tokens
    }

    fn kinds(tokens: &[Token]) -> Vec<&TokenKind> {
        tokens.iter().map(|t| &t.kind).collect()
    }

    #[test]
    fn lexer_valid_return_zero() {
        let tokens = lex_ok(b"int main(void) { return 0; }");
        assert_eq!(
            kinds(&tokens),
            vec![
                &TokenKind::Keyword(Keyword::Int),
                &TokenKind::Ident("main".into()),
                &TokenKind::Punct(Punct::ParenOpen),
                &TokenKind::Keyword(Keyword::Void),
                &TokenKind::Punct(Punct::ParenClose),
                &TokenKind::Punct(Punct::BraceOpen),
                &TokenKind::Keyword(Keyword::Return),
                &TokenKind::IntLit { value: 0, suffix: IntSuffix::None },
                &TokenKind::Punct(Punct::Semicolon),
                &TokenKind::Punct(Punct::BraceClose),
                &TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexer_tracks_positions() {
        let tokens = lex_ok(b"int\n  x;");
        assert_eq!(tokens[0].pos.line, 1);
        assert_eq!(tokens[0].pos.col, 1);
        assert_eq!(tokens[1].pos.line, 2);
        assert_eq!(tokens[1].pos.col, 3);
    }

    #[test]
    fn lexer_integer_suffixes() {
        let tokens = lex_ok(b"1 2u 3l 4ul 5lu");
        assert_eq!(
            kinds(&tokens)[..5],
            [
                &TokenKind::IntLit { value: 1, suffix: IntSuffix::None },
                &TokenKind::IntLit { value: 2, suffix: IntSuffix::Unsigned },
                &TokenKind::IntLit { value: 3, suffix: IntSuffix::Long },
                &TokenKind::IntLit { value: 4, suffix: IntSuffix::UnsignedLong },
                &TokenKind::IntLit { value: 5, suffix: IntSuffix::UnsignedLong },
            ]
        );
    }

    #[test]
    fn lexer_hex_and_octal() {
        let tokens = lex_ok(b"0x1f 017 0");
        assert_eq!(
            kinds(&tokens)[..3],
            [
                &TokenKind::IntLit { value: 31, suffix: IntSuffix::None },
                &TokenKind::IntLit { value: 15, suffix: IntSuffix::None },
                &TokenKind::IntLit { value: 0, suffix: IntSuffix::None },
            ]
        );
    }

    #[test]
    fn lexer_char_and_string_escapes() {
        let tokens = lex_ok(b"'a' '\\n' \"hi\\t\"");
        assert_eq!(tokens[0].kind, TokenKind::CharLit(b'a'));
        assert_eq!(tokens[1].kind, TokenKind::CharLit(b'\n'));
        assert_eq!(tokens[2].kind, TokenKind::StrLit(b"hi\t".to_vec()));
    }

    #[test]
    fn lexer_strips_comments() {
        let tokens = lex_ok(b"int /* a\nb */ x; // trailing\n;");
        assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::Int));
        assert_eq!(tokens[1].kind, TokenKind::Ident("x".into()));
        // Lines inside the block comment still advance positions.
        assert_eq!(tokens[1].pos.line, 2);
    }

    #[test]
    fn lexer_multi_char_operators() {
        let tokens = lex_ok(b"a <<= b >> c->d ++");
        assert_eq!(tokens[1].kind, TokenKind::Punct(Punct::LShiftEq));
        assert_eq!(tokens[3].kind, TokenKind::Punct(Punct::RShift));
        assert_eq!(tokens[5].kind, TokenKind::Punct(Punct::Arrow));
        assert_eq!(tokens[7].kind, TokenKind::Punct(Punct::PlusPlus));
    }

    #[test]
    fn lexer_include_directives() {
        let tokens = lex_ok(b"#include <stdio.h>\n#include \"trie.h\"\n");
        assert_eq!(
            tokens[0].kind,
            TokenKind::Include { path: "stdio.h".into(), angled: true }
        );
        assert_eq!(
            tokens[1].kind,
            TokenKind::Include { path: "trie.h".into(), angled: false }
        );
    }

    #[test]
    fn lexer_invalid_suffix_reported() {
        let mut errors = ErrorCollector::new();
        Lexer::new("test.c", b"int x = 1foo;").lex(&mut errors);
        assert!(!errors.ok());
        assert!(errors.messages()[0].contains("invalid suffix"));
    }

    #[test]
    fn lexer_unterminated_string_reported() {
        let mut errors = ErrorCollector::new();
        Lexer::new("test.c", b"\"abc\n").lex(&mut errors);
        assert!(!errors.ok());
        assert!(errors.messages()[0].contains("unterminated string"));
    }

    #[test]
    fn lexer_unknown_directive_reported() {
        let mut errors = ErrorCollector::new();
        Lexer::new("test.c", b"#define X 1\n").lex(&mut errors);
        assert!(!errors.ok());
        assert!(errors.messages()[0].contains("unsupported preprocessor directive"));
    }

    #[test]
    fn lexer_invalid_character_reported() {
        let mut errors = ErrorCollector::new();
        Lexer::new("test.c", b"int x = 0@1;").lex(&mut errors);
        assert!(!errors.ok());
        assert!(errors.messages()[0].contains("invalid character"));
    }
}
