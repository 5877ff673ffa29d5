//! Symbol Environment
//!
//! Nested name scopes with separate namespaces for ordinary identifiers
//! and struct/union/enum tags, plus linkage resolution and storage
//! durations. Scopes form a bracketed stack: every `push_scope` is paired
//! with a `pop_scope` on all paths, including error recovery.
//!
//! Ordinary identifiers bind to IL values, typedef names, or enumeration
//! constants. Per-value metadata (linkage, storage duration, definition
//! state) outlives scope exit so the backend can place static-storage
//! objects after lowering finishes.

use std::collections::HashMap;

use crate::compiler::il::{ILCode, ValueId};
use crate::compiler::types::{RecordKind, Type, TypePool};
use crate::error::{ErrorCollector, Pos};

/// Linkage of a declared identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Linkage {
    /// Visible across translation units.
    External,
    /// Visible within this translation unit only.
    Internal,
    /// No linkage (ordinary block-scope objects).
    None,
}

/// Storage duration of a declared object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageDur {
    /// Lives for the whole program; placed in `.data`/`.bss`.
    Static,
    /// Lives while its block is active; placed by the register allocator.
    Automatic,
    /// No storage in this unit (functions, bare `extern` declarations);
    /// referenced directly by name.
    None,
}

/// How far a declaration has progressed. Ordered so redeclarations keep
/// the strongest state seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DefState {
    /// Declared only.
    Declared,
    /// File-scope object without initializer; becomes a zero-initialized
    /// definition if nothing stronger appears.
    Tentative,
    /// Fully defined.
    Defined,
}

/// Storage class spelled in a declaration, as parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclStorage {
    /// No storage class specifier.
    Default,
    /// `static`.
    Static,
    /// `extern`.
    Extern,
    /// `typedef`.
    Typedef,
}

/// What an ordinary-namespace name is bound to.
#[derive(Debug, Clone)]
pub enum Binding {
    /// An object or function, represented by its IL value.
    Var(ValueId),
    /// A type alias.
    Typedef(Type),
    /// An enumeration constant with its value.
    EnumConst(i64),
}

/// A tag-namespace entry.
#[derive(Debug, Clone, Copy)]
pub enum TagEntry {
    /// Struct or union; the type's completeness lives in the pool.
    Record(Type),
    /// Enumeration tag; `true` once the enumerator list has been seen.
    Enum(bool),
}

/// Metadata the backend needs about a named value; survives scope exit.
#[derive(Debug, Clone)]
pub struct VarMeta {
    /// Declared name.
    pub name: String,
    /// Linkage.
    pub linkage: Linkage,
    /// Storage duration.
    pub storage: StorageDur,
    /// Definition state.
    pub def_state: DefState,
}

#[derive(Debug, Default)]
struct Frame {
    ordinary: HashMap<String, Binding>,
    tags: HashMap<String, TagEntry>,
}

/// The symbol environment for one translation unit.
#[derive(Debug)]
pub struct SymbolTable {
    frames: Vec<Frame>,
    // (linkage, name) -> value, giving every declaration of an identifier
    // with linkage the same IL value across scopes.
    linkages: HashMap<(Linkage, String), ValueId>,
    // Never popped; the backend reads this after lowering.
    meta: HashMap<ValueId, VarMeta>,
}

impl SymbolTable {
    /// Returns a table with the file scope already open.
    pub fn new() -> Self {
        SymbolTable {
            frames: vec![Frame::default()],
            linkages: HashMap::new(),
            meta: HashMap::new(),
        }
    }

    /// Opens a nested scope.
    pub fn push_scope(&mut self) {
        self.frames.push(Frame::default());
    }

    /// Closes the innermost scope, destroying its automatic bindings.
    ///
    /// # Panics
    ///
    /// Panics if only the file scope remains.
    pub fn pop_scope(&mut self) {
        assert!(self.frames.len() > 1, "cannot pop file scope");
        self.frames.pop();
    }

    /// `true` while the innermost scope is the file scope.
    pub fn at_file_scope(&self) -> bool {
        self.frames.len() == 1
    }

    /// Looks an ordinary identifier up, walking scopes outward.
    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.ordinary.get(name))
    }

    /// Linkage of the visible declaration of `name`, if any.
    fn visible_linkage(&self, name: &str) -> Option<Linkage> {
        match self.lookup(name) {
            Some(Binding::Var(v)) => self.meta.get(v).map(|m| m.linkage),
            _ => None,
        }
    }

    /// Declares an object or function. Performs redeclaration, linkage and
    /// composite-type checking, creates (or reuses) the symbol's IL value,
    /// and returns it. On an unrecoverable conflict a diagnostic is
    /// recorded and `None` is returned.
    #[allow(clippy::too_many_arguments)]
    pub fn declare(
        &mut self,
        name: &str,
        ty: Type,
        storage: DeclStorage,
        defined: DefState,
        pos: Pos,
        pool: &mut TypePool,
        il: &mut ILCode,
        errors: &mut ErrorCollector,
    ) -> Option<ValueId> {
        let file_scope = self.at_file_scope();
        let is_function = pool.is_function(ty);

        // Resolve linkage and storage duration from scope and specifier.
        let (linkage, duration) = match storage {
            DeclStorage::Typedef => unreachable!("typedefs use declare_typedef"),
            DeclStorage::Static if file_scope => {
                (Linkage::Internal, if is_function { StorageDur::None } else { StorageDur::Static })
            }
            DeclStorage::Static => (Linkage::None, StorageDur::Static),
            DeclStorage::Extern => {
                // `extern` adopts a previously visible linkage; otherwise
                // the identifier gets external linkage.
                let linkage =
                    self.visible_linkage(name).unwrap_or(Linkage::External);
                (linkage, StorageDur::None)
            }
            DeclStorage::Default if file_scope || is_function => {
                let dur = if is_function {
                    StorageDur::None
                } else {
                    StorageDur::Static
                };
                (Linkage::External, dur)
            }
            DeclStorage::Default => (Linkage::None, StorageDur::Automatic),
        };

        // A block-scope identifier with linkage cannot carry an
        // initializer.
        if !file_scope
            && storage == DeclStorage::Extern
            && defined == DefState::Defined
            && !is_function
        {
            errors.error(
                format!("declaration of block scope identifier '{name}' with linkage has an initializer"),
                pos,
            );
            return None;
        }

        let mut def_state = defined;
        if file_scope
            && !is_function
            && defined == DefState::Declared
            && storage != DeclStorage::Extern
        {
            // File-scope object without initializer or `extern`: a
            // tentative definition.
            def_state = DefState::Tentative;
        }

        // Find an existing symbol: same scope first, then by linkage.
        let current = self.frames.last().unwrap().ordinary.get(name).cloned();
        let existing = match current {
            Some(Binding::Typedef(_)) | Some(Binding::EnumConst(_)) => {
                errors.error(
                    format!("redeclared '{name}' as different kind of symbol"),
                    pos,
                );
                return None;
            }
            Some(Binding::Var(v)) => {
                let prev = &self.meta[&v];
                if prev.def_state == DefState::Defined
                    && def_state == DefState::Defined
                {
                    errors.error(format!("redefinition of '{name}'"), pos);
                    return None;
                }
                if prev.linkage != linkage {
                    errors.error(
                        format!("redeclared '{name}' with different linkage"),
                        pos,
                    );
                    return None;
                }
                Some(v)
            }
            None => {
                if linkage != Linkage::None {
                    self.linkages.get(&(linkage, name.to_owned())).copied()
                } else {
                    None
                }
            }
        };

        let value = match existing {
            Some(v) => {
                let prev_ty = il.value(v).ty;
                if !pool.compatible(prev_ty, ty) {
                    errors.error(
                        format!("redeclared '{name}' with incompatible type"),
                        pos,
                    );
                    return None;
                }
                // Keep the composite type: a later declaration may
                // complete an array or add a prototype.
                let composite = pool.composite(prev_ty, ty);
                let size = pool.size(composite).unwrap_or(0);
                let signed = pool.is_signed(composite);
                il.update_value_type(v, composite, size, signed);
                v
            }
            None => {
                let size = pool.size(ty).unwrap_or(0);
                let signed = pool.is_signed(ty);
                let is_bool = pool.is_bool(ty);
                il.new_named(ty, size, signed, is_bool, name)
            }
        };

        self.frames
            .last_mut()
            .unwrap()
            .ordinary
            .insert(name.to_owned(), Binding::Var(value));

        if linkage != Linkage::None {
            self.linkages
                .insert((linkage, name.to_owned()), value);
        }

        let meta = self.meta.entry(value).or_insert(VarMeta {
            name: name.to_owned(),
            linkage,
            storage: duration,
            def_state,
        });
        meta.def_state = meta.def_state.max(def_state);
        // An earlier bare `extern` acquires real storage from a later
        // defining declaration.
        if meta.storage == StorageDur::None && duration != StorageDur::None {
            meta.storage = duration;
        }

        Some(value)
    }

    /// Declares a typedef name in the current scope.
    pub fn declare_typedef(
        &mut self,
        name: &str,
        ty: Type,
        pos: Pos,
        pool: &TypePool,
        errors: &mut ErrorCollector,
    ) {
        match self.frames.last().unwrap().ordinary.get(name) {
            Some(Binding::Typedef(prev)) => {
                if !pool.compatible(*prev, ty) {
                    errors.error(
                        format!("'{name}' redeclared as incompatible type in same scope"),
                        pos,
                    );
                }
            }
            Some(_) => {
                errors.error(
                    format!("'{name}' redeclared as type definition in same scope"),
                    pos,
                );
            }
            None => {
                self.frames
                    .last_mut()
                    .unwrap()
                    .ordinary
                    .insert(name.to_owned(), Binding::Typedef(ty));
            }
        }
    }

    /// Declares an enumeration constant in the current scope.
    pub fn declare_enum_const(
        &mut self,
        name: &str,
        value: i64,
        pos: Pos,
        errors: &mut ErrorCollector,
    ) {
        let frame = self.frames.last_mut().unwrap();
        if frame.ordinary.contains_key(name) {
            errors.error(format!("redefinition of '{name}'"), pos);
            return;
        }
        frame
            .ordinary
            .insert(name.to_owned(), Binding::EnumConst(value));
    }

    /// Looks a tag up, walking scopes outward.
    pub fn lookup_tag(&self, name: &str) -> Option<TagEntry> {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.tags.get(name).copied())
    }

    /// Looks a tag up in the innermost scope only.
    pub fn lookup_tag_current(&self, name: &str) -> Option<TagEntry> {
        self.frames.last().unwrap().tags.get(name).copied()
    }

    /// Declares (or finds) a struct/union tag in the current scope,
    /// returning its record type. Reports a diagnostic and returns `None`
    /// if the tag names a different kind in the same scope.
    pub fn declare_record_tag(
        &mut self,
        kind: RecordKind,
        name: &str,
        pos: Pos,
        pool: &mut TypePool,
        errors: &mut ErrorCollector,
    ) -> Option<Type> {
        if let Some(entry) = self.lookup_tag_current(name) {
            return match entry {
                TagEntry::Record(ty) if pool.record_kind(ty) == Some(kind) => {
                    Some(ty)
                }
                _ => {
                    errors.error(
                        format!("'{name}' defined as wrong kind of tag"),
                        pos,
                    );
                    None
                }
            };
        }

        let ty = pool.declare_record(kind, Some(name));
        self.frames
            .last_mut()
            .unwrap()
            .tags
            .insert(name.to_owned(), TagEntry::Record(ty));
        Some(ty)
    }

    /// Declares an enum tag in the current scope. `defined` marks the
    /// enumerator list as seen.
    pub fn declare_enum_tag(
        &mut self,
        name: &str,
        defined: bool,
        pos: Pos,
        errors: &mut ErrorCollector,
    ) {
        match self.frames.last_mut().unwrap().tags.get_mut(name) {
            Some(TagEntry::Enum(was_defined)) => {
                if *was_defined && defined {
                    errors.error(format!("redefinition of 'enum {name}'"), pos);
                } else {
                    *was_defined |= defined;
                }
            }
            Some(TagEntry::Record(_)) => {
                errors.error(
                    format!("'{name}' defined as wrong kind of tag"),
                    pos,
                );
            }
            None => {
                self.frames
                    .last_mut()
                    .unwrap()
                    .tags
                    .insert(name.to_owned(), TagEntry::Enum(defined));
            }
        }
    }

    /// Backend metadata for a named value.
    pub fn var_meta(&self, v: ValueId) -> Option<&VarMeta> {
        self.meta.get(&v)
    }

    /// All named values seen in the unit, for static-data placement.
    pub fn all_meta(&self) -> impl Iterator<Item = (ValueId, &VarMeta)> {
        self.meta.iter().map(|(&v, m)| (v, m))
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (SymbolTable, TypePool, ILCode, ErrorCollector) {
        (
            SymbolTable::new(),
            TypePool::new(),
            ILCode::new(),
            ErrorCollector::new(),
        )
    }

    fn pos() -> Pos {
        Pos::start_of("test.c")
    }

    #[test]
    fn lookup_walks_outward() {
        let (mut syms, mut pool, mut il, mut errors) = setup();

        let outer = syms
            .declare(
                "x",
                TypePool::INT,
                DeclStorage::Default,
                DefState::Defined,
                pos(),
                &mut pool,
                &mut il,
                &mut errors,
            )
            .unwrap();

        syms.push_scope();
        assert!(matches!(syms.lookup("x"), Some(Binding::Var(v)) if *v == outer));

        let inner = syms
            .declare(
                "x",
                TypePool::LONG,
                DeclStorage::Default,
                DefState::Defined,
                pos(),
                &mut pool,
                &mut il,
                &mut errors,
            )
            .unwrap();
        assert!(matches!(syms.lookup("x"), Some(Binding::Var(v)) if *v == inner));

        syms.pop_scope();
        assert!(matches!(syms.lookup("x"), Some(Binding::Var(v)) if *v == outer));
        assert!(errors.ok());
    }

    #[test]
    fn shadowing_in_inner_scope_is_not_redeclaration() {
        let (mut syms, mut pool, mut il, mut errors) = setup();
        syms.push_scope();

        syms.declare(
            "n",
            TypePool::INT,
            DeclStorage::Default,
            DefState::Defined,
            pos(),
            &mut pool,
            &mut il,
            &mut errors,
        );
        syms.push_scope();
        syms.declare(
            "n",
            TypePool::CHAR,
            DeclStorage::Default,
            DefState::Defined,
            pos(),
            &mut pool,
            &mut il,
            &mut errors,
        );
        assert!(errors.ok());
    }

    #[test]
    fn incompatible_redeclaration_rejected() {
        let (mut syms, mut pool, mut il, mut errors) = setup();

        syms.declare(
            "x",
            TypePool::INT,
            DeclStorage::Default,
            DefState::Tentative,
            pos(),
            &mut pool,
            &mut il,
            &mut errors,
        );
        syms.declare(
            "x",
            TypePool::LONG,
            DeclStorage::Default,
            DefState::Tentative,
            pos(),
            &mut pool,
            &mut il,
            &mut errors,
        );
        assert!(!errors.ok());
        assert!(errors.messages()[0].contains("incompatible type"));
    }

    #[test]
    fn tentative_definitions_coalesce() {
        let (mut syms, mut pool, mut il, mut errors) = setup();

        let a = syms
            .declare(
                "x",
                TypePool::INT,
                DeclStorage::Default,
                DefState::Declared,
                pos(),
                &mut pool,
                &mut il,
                &mut errors,
            )
            .unwrap();
        let b = syms
            .declare(
                "x",
                TypePool::INT,
                DeclStorage::Default,
                DefState::Declared,
                pos(),
                &mut pool,
                &mut il,
                &mut errors,
            )
            .unwrap();

        assert_eq!(a, b);
        assert!(errors.ok());
        assert_eq!(syms.var_meta(a).unwrap().def_state, DefState::Tentative);
    }

    #[test]
    fn double_definition_rejected() {
        let (mut syms, mut pool, mut il, mut errors) = setup();

        syms.declare(
            "x",
            TypePool::INT,
            DeclStorage::Default,
            DefState::Defined,
            pos(),
            &mut pool,
            &mut il,
            &mut errors,
        );
        syms.declare(
            "x",
            TypePool::INT,
            DeclStorage::Default,
            DefState::Defined,
            pos(),
            &mut pool,
            &mut il,
            &mut errors,
        );
        assert!(!errors.ok());
        assert!(errors.messages()[0].contains("redefinition"));
    }

    #[test]
    fn linkage_mismatch_rejected() {
        let (mut syms, mut pool, mut il, mut errors) = setup();

        // `static int x;` then `int x;` in the same scope: internal vs
        // external linkage.
        syms.declare(
            "x",
            TypePool::INT,
            DeclStorage::Static,
            DefState::Tentative,
            pos(),
            &mut pool,
            &mut il,
            &mut errors,
        );
        syms.declare(
            "x",
            TypePool::INT,
            DeclStorage::Default,
            DefState::Tentative,
            pos(),
            &mut pool,
            &mut il,
            &mut errors,
        );
        assert!(!errors.ok());
        assert!(errors.messages()[0].contains("linkage"));
    }

    #[test]
    fn block_extern_adopts_outer_linkage() {
        let (mut syms, mut pool, mut il, mut errors) = setup();

        let file = syms
            .declare(
                "counter",
                TypePool::INT,
                DeclStorage::Static,
                DefState::Defined,
                pos(),
                &mut pool,
                &mut il,
                &mut errors,
            )
            .unwrap();

        syms.push_scope();
        let block = syms
            .declare(
                "counter",
                TypePool::INT,
                DeclStorage::Extern,
                DefState::Declared,
                pos(),
                &mut pool,
                &mut il,
                &mut errors,
            )
            .unwrap();

        assert_eq!(file, block);
        assert_eq!(syms.var_meta(block).unwrap().linkage, Linkage::Internal);
        assert!(errors.ok());
    }

    #[test]
    fn block_extern_with_initializer_rejected() {
        let (mut syms, mut pool, mut il, mut errors) = setup();
        syms.push_scope();

        syms.declare(
            "x",
            TypePool::INT,
            DeclStorage::Extern,
            DefState::Defined,
            pos(),
            &mut pool,
            &mut il,
            &mut errors,
        );
        assert!(!errors.ok());
    }

    #[test]
    fn record_tags_separate_namespace() {
        let (mut syms, mut pool, mut il, mut errors) = setup();

        let s = syms
            .declare_record_tag(RecordKind::Struct, "node", pos(), &mut pool, &mut errors)
            .unwrap();

        // An ordinary identifier with the same spelling coexists.
        syms.declare(
            "node",
            TypePool::INT,
            DeclStorage::Default,
            DefState::Defined,
            pos(),
            &mut pool,
            &mut il,
            &mut errors,
        );
        assert!(errors.ok());

        // Same tag in the same scope resolves to the same type.
        let again = syms
            .declare_record_tag(RecordKind::Struct, "node", pos(), &mut pool, &mut errors)
            .unwrap();
        assert_eq!(s, again);

        // A union tag with the same name in the same scope is an error.
        syms.declare_record_tag(RecordKind::Union, "node", pos(), &mut pool, &mut errors);
        assert!(!errors.ok());
    }

    #[test]
    fn enum_constants_bind_ordinary_names() {
        let (mut syms, _pool, _il, mut errors) = setup();

        syms.declare_enum_const("RED", 0, pos(), &mut errors);
        syms.declare_enum_const("GREEN", 1, pos(), &mut errors);
        assert!(matches!(syms.lookup("GREEN"), Some(Binding::EnumConst(1))));

        syms.declare_enum_const("RED", 5, pos(), &mut errors);
        assert!(!errors.ok());
    }
}
