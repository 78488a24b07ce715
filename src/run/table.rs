// Distributed under the OSI-approved BSD 2-Clause License.
// See accompanying LICENSE file for details.

use std::collections::hash_map::HashMap;
use std::rc::Rc;

use crate::data::{
    Action, Bullet, BulletML, Element, EntityRef, ExpressionContext, Fire, NamedEntityRef, Value,
};
use crate::run::runner::RunError;

/// Bindings for the positional parameters and `$loop.index`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Parameters {
    positional: Vec<Value>,
    loop_index: Option<Value>,
}

impl Parameters {
    pub(crate) fn positional(values: Vec<Value>) -> Self {
        Parameters {
            positional: values,
            loop_index: None,
        }
    }

    /// A copy of the bindings with `$loop.index` set.
    pub(crate) fn with_loop_index(&self, index: Value) -> Self {
        Parameters {
            positional: self.positional.clone(),
            loop_index: Some(index),
        }
    }

    /// Look up a variable by its name without the leading `$`.
    pub(crate) fn get(&self, name: &str) -> Option<Value> {
        if name == "loop.index" {
            self.loop_index
        } else {
            name.parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|idx| self.positional.get(idx))
                .copied()
        }
    }
}

/// A trait to look up entities by label.
pub(crate) trait EntityLookup<'a, T> {
    fn find(&self, label: &str) -> Option<&'a T>;
}

/// The document's label-indexed definitions.
///
/// Built from the top-level elements in document order; the last definition
/// of a label wins.
pub(crate) struct DefTables<'a> {
    actions: HashMap<&'a str, &'a Action>,
    bullets: HashMap<&'a str, &'a Bullet>,
    fires: HashMap<&'a str, &'a Fire>,
}

impl<'a> DefTables<'a> {
    pub(crate) fn new(document: &'a BulletML) -> Self {
        let mut actions = HashMap::new();
        let mut bullets = HashMap::new();
        let mut fires = HashMap::new();

        for element in &document.elements {
            match element {
                Element::Bullet(bullet) => {
                    if let Some(label) = &bullet.label {
                        bullets.insert(label.as_str(), bullet);
                    }
                },
                Element::Action(action) => {
                    if let Some(label) = &action.label {
                        actions.insert(label.as_str(), action);
                    }
                },
                Element::Fire(fire) => {
                    if let Some(label) = &fire.label {
                        fires.insert(label.as_str(), fire);
                    }
                },
            }
        }

        DefTables {
            actions,
            bullets,
            fires,
        }
    }
}

impl<'a> EntityLookup<'a, Action> for DefTables<'a> {
    fn find(&self, label: &str) -> Option<&'a Action> {
        self.actions.get(label).copied()
    }
}

impl<'a> EntityLookup<'a, Bullet> for DefTables<'a> {
    fn find(&self, label: &str) -> Option<&'a Bullet> {
        self.bullets.get(label).copied()
    }
}

impl<'a> EntityLookup<'a, Fire> for DefTables<'a> {
    fn find(&self, label: &str) -> Option<&'a Fire> {
        self.fires.get(label).copied()
    }
}

/// An inline-or-referenced entity, resolved.
pub(crate) struct Resolved<'a, T> {
    pub(crate) entity: &'a T,
    pub(crate) params: Rc<Parameters>,
    /// Whether every parameter expression evaluated deterministically.
    /// Inline entities reuse the caller's bindings and are always
    /// deterministic.
    pub(crate) deterministic: bool,
}

pub(crate) fn resolve_ref<'a, T>(
    entity_ref: &'a EntityRef<T>,
    tables: &DefTables<'a>,
    caller: &Rc<Parameters>,
    ctx: &dyn ExpressionContext,
) -> Result<Resolved<'a, T>, RunError>
where
    T: NamedEntityRef,
    DefTables<'a>: EntityLookup<'a, T>,
{
    match entity_ref {
        EntityRef::Real(entity) => Ok(Resolved {
            entity,
            params: Rc::clone(caller),
            deterministic: true,
        }),
        EntityRef::Ref(reference) => {
            let entity = tables.find(&reference.label).ok_or_else(|| {
                RunError::UnresolvedLabel {
                    kind: T::REF_NAME,
                    label: reference.label.clone(),
                    path: reference.path.clone(),
                }
            })?;

            let mut positional = Vec::with_capacity(reference.params.len());
            let mut deterministic = true;
            for param in &reference.params {
                let evaluation = param.value.eval(ctx).map_err(|source| {
                    RunError::Expression {
                        path: param.path.clone(),
                        source,
                    }
                })?;
                deterministic &= evaluation.deterministic;
                positional.push(evaluation.value);
            }

            Ok(Resolved {
                entity,
                params: Rc::new(Parameters::positional(positional)),
                deterministic,
            })
        },
    }
}

#[cfg(test)]
mod test {
    use crate::data::BulletML;
    use crate::run::table::{DefTables, EntityLookup, Parameters};

    #[test]
    fn test_parameters_lookup() {
        let params = Parameters::positional(vec![10., 20.]);

        assert_eq!(params.get("1"), Some(10.));
        assert_eq!(params.get("2"), Some(20.));
        assert_eq!(params.get("3"), None);
        assert_eq!(params.get("0"), None);
        assert_eq!(params.get("loop.index"), None);
        assert_eq!(params.get("bogus"), None);

        let looped = params.with_loop_index(4.);
        assert_eq!(looped.get("loop.index"), Some(4.));
        assert_eq!(looped.get("1"), Some(10.));
    }

    #[test]
    fn test_last_definition_wins() {
        let doc = BulletML::load_str(
            r#"
            <bulletml>
                <action label="a"><wait>1</wait></action>
                <action label="a"><wait>1</wait><wait>1</wait></action>
            </bulletml>
            "#,
        )
        .unwrap();

        let tables = DefTables::new(&doc);
        let action: &crate::data::Action = tables.find("a").unwrap();
        assert_eq!(action.steps.len(), 2);
    }
}
