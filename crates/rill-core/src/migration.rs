//! Schema migration: diffing two patterns into structural operations.
//!
//! `get_migration_operations(current, next, path)` walks both patterns and
//! emits the ordered list of operations turning data shaped like `current`
//! into data shaped like `next`. Identity and subtyping (through the symbolic
//! lattice) short-circuit to "no operations".

use std::collections::HashMap;

use rill_symbolic::{RecTestCallState, SymbolicValue};
use thiserror::Error;

use crate::context::Context;
use crate::pattern::{EntryPattern, ListPattern, Pattern, PatternKind, SeqShape};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MigrationError {
    #[error("unreachable: a concrete pattern projected to a non-concretizable symbolic value")]
    Unreachable,
}

/// A slash-separated address into the pattern tree. List element positions use
/// indices; the general element uses `*`.
pub type PseudoPath = String;

#[derive(Debug, Clone)]
pub enum MigrationOp {
    /// The whole subtree changes shape.
    Replacement {
        pseudo_path: PseudoPath,
        current: Pattern,
        next: Pattern,
    },
    /// A property disappears.
    Removal {
        pseudo_path: PseudoPath,
        value: Pattern,
    },
    /// A previously-optional property becomes required; existing data may
    /// hold no value and must be initialized.
    NillableInitialization {
        pseudo_path: PseudoPath,
        value: Pattern,
    },
    /// A new property appears.
    Inclusion {
        pseudo_path: PseudoPath,
        value: Pattern,
        optional: bool,
    },
}

impl MigrationOp {
    pub fn pseudo_path(&self) -> &str {
        match self {
            MigrationOp::Replacement { pseudo_path, .. }
            | MigrationOp::Removal { pseudo_path, .. }
            | MigrationOp::NillableInitialization { pseudo_path, .. }
            | MigrationOp::Inclusion { pseudo_path, .. } => pseudo_path,
        }
    }
}

/// `/a/b` style join; an empty base means the root.
fn join_pseudo_path(base: &str, segment: &str) -> PseudoPath {
    let base = base.trim_end_matches('/');
    format!("{base}/{segment}")
}

fn replacement(pseudo_path: &str, current: &Pattern, next: &Pattern) -> Vec<MigrationOp> {
    vec![MigrationOp::Replacement {
        pseudo_path: pseudo_path.to_string(),
        current: current.clone(),
        next: next.clone(),
    }]
}

/// Whether `sub`'s value set is included in `superset`'s, decided in the
/// symbolic lattice.
fn is_sub_type(
    ctx: &Context,
    sub: &Pattern,
    superset: &Pattern,
) -> Result<bool, MigrationError> {
    let mut encountered: HashMap<usize, SymbolicValue> = HashMap::new();
    let symbolic_sub = sub.to_symbolic_value(ctx, &mut encountered);
    let symbolic_super = superset.to_symbolic_value(ctx, &mut encountered);

    if !symbolic_sub.is_concretizable() || !symbolic_super.is_concretizable() {
        return Err(MigrationError::Unreachable);
    }

    let mut state = RecTestCallState::new();
    Ok(symbolic_super.test(&symbolic_sub, &mut state))
}

pub fn get_migration_operations(
    ctx: &Context,
    current: &Pattern,
    next: &Pattern,
    pseudo_path: &str,
) -> Result<Vec<MigrationOp>, MigrationError> {
    if current.ptr_eq(next) || is_sub_type(ctx, current, next)? {
        return Ok(Vec::new());
    }

    match current.kind() {
        PatternKind::Object(object_pattern) => {
            let next_entries = match next.kind() {
                PatternKind::Object(next_object) => &next_object.entries,
                _ => return Ok(replacement(pseudo_path, current, next)),
            };
            struct_migrations(
                ctx,
                current,
                next,
                pseudo_path,
                &object_pattern.entries,
                next_entries,
            )
        }
        PatternKind::Record(record_pattern) => {
            let next_entries = match next.kind() {
                PatternKind::Record(next_record) => &next_record.entries,
                _ => return Ok(replacement(pseudo_path, current, next)),
            };
            struct_migrations(
                ctx,
                current,
                next,
                pseudo_path,
                &record_pattern.entries,
                next_entries,
            )
        }
        PatternKind::List(list_pattern) => {
            let next_list = match next.kind() {
                PatternKind::List(next_list) => next_list,
                _ => return Ok(replacement(pseudo_path, current, next)),
            };
            list_migrations(ctx, current, next, pseudo_path, list_pattern, next_list)
        }
        // Not migration-aware: any change is a replacement.
        _ => Ok(replacement(pseudo_path, current, next)),
    }
}

fn struct_migrations(
    ctx: &Context,
    current: &Pattern,
    next: &Pattern,
    pseudo_path: &str,
    current_entries: &Option<indexmap::IndexMap<String, EntryPattern>>,
    next_entries: &Option<indexmap::IndexMap<String, EntryPattern>>,
) -> Result<Vec<MigrationOp>, MigrationError> {
    let Some(current_entries) = current_entries else {
        // The current shape is unknown: replace wholesale.
        return Ok(replacement(pseudo_path, current, next));
    };
    let Some(next_entries) = next_entries else {
        // The next shape accepts anything: nothing to migrate.
        return Ok(Vec::new());
    };

    let mut migrations = Vec::new();

    for (name, entry) in current_entries {
        let entry_path = join_pseudo_path(pseudo_path, name);
        match next_entries.get(name) {
            None => migrations.push(MigrationOp::Removal {
                pseudo_path: entry_path,
                value: entry.pattern.clone(),
            }),
            Some(next_entry) => {
                let mut list =
                    get_migration_operations(ctx, &entry.pattern, &next_entry.pattern, &entry_path)?;
                if list.is_empty() && entry.optional && !next_entry.optional {
                    list.push(MigrationOp::NillableInitialization {
                        pseudo_path: entry_path,
                        value: entry.pattern.clone(),
                    });
                }
                migrations.extend(list);
            }
        }
    }

    for (name, next_entry) in next_entries {
        if current_entries.contains_key(name) {
            continue;
        }
        migrations.push(MigrationOp::Inclusion {
            pseudo_path: join_pseudo_path(pseudo_path, name),
            value: next_entry.pattern.clone(),
            optional: next_entry.optional,
        });
    }

    Ok(migrations)
}

fn list_migrations(
    ctx: &Context,
    current: &Pattern,
    next: &Pattern,
    pseudo_path: &str,
    current_list: &ListPattern,
    next_list: &ListPattern,
) -> Result<Vec<MigrationOp>, MigrationError> {
    let general_elem_path = join_pseudo_path(pseudo_path, "*");

    match (&current_list.shape, &next_list.shape) {
        (SeqShape::General(current_general), SeqShape::General(next_general)) => {
            get_migration_operations(ctx, current_general, next_general, &general_elem_path)
        }
        (SeqShape::General(_), SeqShape::Elements(_)) => {
            Ok(replacement(pseudo_path, current, next))
        }
        (SeqShape::Elements(current_elements), SeqShape::General(next_general)) => {
            let mut migrations = Vec::new();
            for (index, element) in current_elements.iter().enumerate() {
                let elem_path = join_pseudo_path(pseudo_path, &index.to_string());
                migrations.extend(get_migration_operations(
                    ctx,
                    element,
                    next_general,
                    &elem_path,
                )?);
            }
            Ok(migrations)
        }
        (SeqShape::Elements(current_elements), SeqShape::Elements(next_elements)) => {
            if current_elements.len() != next_elements.len() {
                return Ok(replacement(pseudo_path, current, next));
            }
            let mut migrations = Vec::new();
            for (index, (element, next_element)) in
                current_elements.iter().zip(next_elements).enumerate()
            {
                let elem_path = join_pseudo_path(pseudo_path, &index.to_string());
                migrations.extend(get_migration_operations(
                    ctx,
                    element,
                    next_element,
                    &elem_path,
                )?);
            }
            Ok(migrations)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, ContextConfig};
    use crate::pattern::object_entries;

    fn ctx() -> Context {
        Context::new(ContextConfig::default()).unwrap()
    }

    fn int(ctx: &Context) -> Pattern {
        ctx.resolve_named_pattern("int").unwrap()
    }

    fn str_pattern(ctx: &Context) -> Pattern {
        ctx.resolve_named_pattern("str").unwrap()
    }

    #[test]
    fn identical_patterns_need_no_migration() {
        let ctx = ctx();
        let pattern = Pattern::object(object_entries([("a", int(&ctx), false)]), false);
        let ops = get_migration_operations(&ctx, &pattern, &pattern, "").unwrap();
        assert!(ops.is_empty());
    }

    #[test]
    fn subtype_needs_no_migration() {
        let ctx = ctx();
        // Same shape, structurally equal but different pattern objects.
        let a = Pattern::object(object_entries([("a", int(&ctx), false)]), false);
        let b = Pattern::object(object_entries([("a", int(&ctx), false)]), false);
        let ops = get_migration_operations(&ctx, &a, &b, "").unwrap();
        assert!(ops.is_empty());
    }

    #[test]
    fn optional_to_required_and_new_property() {
        let ctx = ctx();
        let current = Pattern::object(
            object_entries([("a", int(&ctx), false), ("b", int(&ctx), true)]),
            false,
        );
        let next = Pattern::object(
            object_entries([
                ("a", int(&ctx), false),
                ("b", int(&ctx), false),
                ("c", int(&ctx), false),
            ]),
            false,
        );
        let ops = get_migration_operations(&ctx, &current, &next, "").unwrap();
        assert_eq!(ops.len(), 2);
        match &ops[0] {
            MigrationOp::NillableInitialization { pseudo_path, .. } => {
                assert_eq!(pseudo_path, "/b");
            }
            other => panic!("expected nillable initialization, got {other:?}"),
        }
        match &ops[1] {
            MigrationOp::Inclusion {
                pseudo_path,
                optional,
                ..
            } => {
                assert_eq!(pseudo_path, "/c");
                assert!(!optional);
            }
            other => panic!("expected inclusion, got {other:?}"),
        }
    }

    #[test]
    fn removed_property() {
        let ctx = ctx();
        let current = Pattern::object(
            object_entries([("a", int(&ctx), false), ("gone", str_pattern(&ctx), false)]),
            false,
        );
        let next = Pattern::object(object_entries([("a", int(&ctx), false)]), false);
        let ops = get_migration_operations(&ctx, &current, &next, "").unwrap();
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            MigrationOp::Removal { pseudo_path, .. } => assert_eq!(pseudo_path, "/gone"),
            other => panic!("expected removal, got {other:?}"),
        }
    }

    #[test]
    fn changed_property_type_is_a_replacement() {
        let ctx = ctx();
        let current = Pattern::object(object_entries([("a", int(&ctx), false)]), false);
        let next = Pattern::object(object_entries([("a", str_pattern(&ctx), false)]), false);
        let ops = get_migration_operations(&ctx, &current, &next, "").unwrap();
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            MigrationOp::Replacement { pseudo_path, .. } => assert_eq!(pseudo_path, "/a"),
            other => panic!("expected replacement, got {other:?}"),
        }
    }

    #[test]
    fn container_kind_mismatch_is_a_root_replacement() {
        let ctx = ctx();
        let current = Pattern::object(object_entries([("a", int(&ctx), false)]), false);
        let next = Pattern::record(object_entries([("a", int(&ctx), false)]));
        let ops = get_migration_operations(&ctx, &current, &next, "").unwrap();
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            MigrationOp::Replacement { pseudo_path, .. } => assert_eq!(pseudo_path, ""),
            other => panic!("expected replacement, got {other:?}"),
        }
    }

    #[test]
    fn open_next_shape_needs_no_migration() {
        let ctx = ctx();
        let current = Pattern::object(object_entries([("a", int(&ctx), false)]), false);
        let next = Pattern::any_object();
        let ops = get_migration_operations(&ctx, &current, &next, "").unwrap();
        assert!(ops.is_empty());
    }

    #[test]
    fn general_element_recursion_uses_star() {
        let ctx = ctx();
        let current = Pattern::list_of(int(&ctx));
        let next = Pattern::list_of(str_pattern(&ctx));
        let ops = get_migration_operations(&ctx, &current, &next, "").unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].pseudo_path(), "/*");
    }

    #[test]
    fn indexed_lists_recurse_per_index() {
        let ctx = ctx();
        let current = Pattern::list_elements(vec![int(&ctx), int(&ctx)]);
        let next = Pattern::list_elements(vec![int(&ctx), str_pattern(&ctx)]);
        let ops = get_migration_operations(&ctx, &current, &next, "").unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].pseudo_path(), "/1");
    }

    #[test]
    fn indexed_length_mismatch_replaces_the_list() {
        let ctx = ctx();
        let current = Pattern::list_elements(vec![int(&ctx)]);
        let next = Pattern::list_elements(vec![int(&ctx), int(&ctx)]);
        let ops = get_migration_operations(&ctx, &current, &next, "").unwrap();
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            MigrationOp::Replacement { pseudo_path, .. } => assert_eq!(pseudo_path, ""),
            other => panic!("expected replacement, got {other:?}"),
        }
    }

    #[test]
    fn general_to_indexed_replaces_the_list() {
        let ctx = ctx();
        let current = Pattern::list_of(int(&ctx));
        let next = Pattern::list_elements(vec![int(&ctx)]);
        let ops = get_migration_operations(&ctx, &current, &next, "").unwrap();
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], MigrationOp::Replacement { .. }));
    }

    #[test]
    fn nested_object_paths_compose() {
        let ctx = ctx();
        let current_user = Pattern::object(object_entries([("name", int(&ctx), true)]), false);
        let next_user = Pattern::object(object_entries([("name", int(&ctx), false)]), false);
        let current = Pattern::object(object_entries([("user", current_user, false)]), false);
        let next = Pattern::object(object_entries([("user", next_user, false)]), false);
        let ops = get_migration_operations(&ctx, &current, &next, "").unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].pseudo_path(), "/user/name");
    }

    #[test]
    fn pseudo_paths_are_unique() {
        let ctx = ctx();
        let current = Pattern::object(
            object_entries([
                ("a", int(&ctx), true),
                ("b", str_pattern(&ctx), false),
                ("c", int(&ctx), false),
            ]),
            false,
        );
        let next = Pattern::object(
            object_entries([
                ("a", int(&ctx), false),
                ("b", int(&ctx), false),
                ("d", int(&ctx), true),
            ]),
            false,
        );
        let ops = get_migration_operations(&ctx, &current, &next, "").unwrap();
        let mut paths: Vec<&str> = ops.iter().map(MigrationOp::pseudo_path).collect();
        let before = paths.len();
        paths.sort_unstable();
        paths.dedup();
        assert_eq!(before, paths.len());
    }
}
