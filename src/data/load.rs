// Distributed under the OSI-approved BSD 2-Clause License.
// See accompanying LICENSE file for details.

use std::io;

use log::debug;
use thiserror::Error;

use crate::data::{
    Action, Bullet, BulletML, Element, ElementPath, EntityRef, Fire, NamedEntityRef, Reference,
    Step,
};

/// An error when loading a BulletML document.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The XML stream could not be decoded into a document.
    ///
    /// This covers malformed XML as well as structural problems the decoder
    /// detects itself: unknown elements, unknown `type` attribute values,
    /// missing or duplicated one-of children, and expressions which fail to
    /// parse.
    #[error("failed to decode BulletML document")]
    Xml {
        /// The decoder error.
        #[from]
        source: serde_xml_rs::Error,
    },
    /// A structural invariant of the document does not hold.
    #[error("{message} (in {path})")]
    Structure {
        /// A description of the violated invariant.
        message: String,
        /// The trail of elements leading to the violation.
        path: ElementPath,
    },
}

impl BulletML {
    /// Load a document from an XML byte stream.
    pub fn load<R>(reader: R) -> Result<Self, LoadError>
    where
        R: io::Read,
    {
        let mut document: BulletML = serde_xml_rs::from_reader(reader)?;
        document.prepare()?;
        Ok(document)
    }

    /// Load a document from an XML string.
    pub fn load_str(source: &str) -> Result<Self, LoadError> {
        let mut document: BulletML = serde_xml_rs::from_str(source)?;
        document.prepare()?;
        Ok(document)
    }

    /// Walk the decoded tree, validating references and assigning each
    /// runtime-error-capable node its element path.
    fn prepare(&mut self) -> Result<(), LoadError> {
        let mut stack = PathStack::new();

        for element in &mut self.elements {
            match element {
                Element::Bullet(bullet) => prepare_bullet(bullet, &mut stack)?,
                Element::Action(action) => prepare_action(action, &mut stack)?,
                Element::Fire(fire) => prepare_fire(fire, &mut stack)?,
            }
        }

        debug!(
            "loaded BulletML document with {} top-level elements",
            self.elements.len(),
        );

        Ok(())
    }
}

struct PathStack(Vec<&'static str>);

impl PathStack {
    fn new() -> Self {
        Self(vec!["bulletml"])
    }

    fn push(&mut self, name: &'static str) {
        self.0.push(name);
    }

    fn pop(&mut self) {
        self.0.pop();
    }

    /// Render the path of a `name` element under the current stack.
    fn leaf(&self, name: &'static str) -> ElementPath {
        let mut rendered = String::new();
        for ancestor in &self.0 {
            rendered.push('<');
            rendered.push_str(ancestor);
            rendered.push_str("> => ");
        }
        rendered.push('<');
        rendered.push_str(name);
        rendered.push('>');
        ElementPath(rendered)
    }
}

fn prepare_entity_ref<T, F>(
    entity_ref: &mut EntityRef<T>,
    stack: &mut PathStack,
    prepare: F,
) -> Result<(), LoadError>
where
    T: NamedEntityRef,
    F: FnOnce(&mut T, &mut PathStack) -> Result<(), LoadError>,
{
    match entity_ref {
        EntityRef::Real(entity) => prepare(entity, stack),
        EntityRef::Ref(reference) => prepare_reference(reference, T::REF_NAME, stack),
    }
}

fn prepare_reference(
    reference: &mut Reference,
    name: &'static str,
    stack: &mut PathStack,
) -> Result<(), LoadError> {
    reference.path = stack.leaf(name);

    if reference.label.is_empty() {
        return Err(LoadError::Structure {
            message: format!("<{}> element requires 'label' attribute", name),
            path: reference.path.clone(),
        });
    }

    stack.push(name);
    for param in &mut reference.params {
        param.path = stack.leaf("param");
    }
    stack.pop();

    Ok(())
}

fn prepare_bullet(bullet: &mut Bullet, stack: &mut PathStack) -> Result<(), LoadError> {
    stack.push("bullet");

    if let Some(direction) = &mut bullet.direction {
        direction.path = stack.leaf("direction");
    }
    if let Some(speed) = &mut bullet.speed {
        speed.path = stack.leaf("speed");
    }
    for action in &mut bullet.actions {
        prepare_entity_ref(action, stack, prepare_action)?;
    }

    stack.pop();
    Ok(())
}

fn prepare_action(action: &mut Action, stack: &mut PathStack) -> Result<(), LoadError> {
    stack.push("action");

    for step in &mut action.steps {
        match step {
            Step::Repeat(repeat) => {
                stack.push("repeat");
                repeat.times.path = stack.leaf("times");
                prepare_entity_ref(&mut repeat.action, stack, prepare_action)?;
                stack.pop();
            },
            Step::Fire(fire) => prepare_entity_ref(fire, stack, prepare_fire)?,
            Step::ChangeSpeed(change_speed) => {
                stack.push("changeSpeed");
                change_speed.speed.path = stack.leaf("speed");
                change_speed.term.path = stack.leaf("term");
                stack.pop();
            },
            Step::ChangeDirection(change_direction) => {
                stack.push("changeDirection");
                change_direction.direction.path = stack.leaf("direction");
                change_direction.term.path = stack.leaf("term");
                stack.pop();
            },
            Step::Accel(accel) => {
                stack.push("accel");
                if let Some(horizontal) = &mut accel.horizontal {
                    horizontal.path = stack.leaf("horizontal");
                }
                if let Some(vertical) = &mut accel.vertical {
                    vertical.path = stack.leaf("vertical");
                }
                accel.term.path = stack.leaf("term");
                stack.pop();
            },
            Step::Wait(wait) => {
                wait.path = stack.leaf("wait");
            },
            Step::Vanish(_) => {},
            Step::Action(action) => prepare_entity_ref(action, stack, prepare_action)?,
        }
    }

    stack.pop();
    Ok(())
}

fn prepare_fire(fire: &mut Fire, stack: &mut PathStack) -> Result<(), LoadError> {
    stack.push("fire");

    if let Some(direction) = &mut fire.direction {
        direction.path = stack.leaf("direction");
    }
    if let Some(speed) = &mut fire.speed {
        speed.path = stack.leaf("speed");
    }
    prepare_entity_ref(&mut fire.bullet, stack, prepare_bullet)?;

    stack.pop();
    Ok(())
}
