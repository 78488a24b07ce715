// Distributed under the OSI-approved BSD 2-Clause License.
// See accompanying LICENSE file for details.

//! BulletML
//!
//! A BulletML parser and interpreter.
//!
//! BulletML is a declarative XML language describing bullet behavior in 2D
//! shoot-'em-up games. This crate loads a document into a validated tree
//! ([`data::BulletML`]) and interprets it one tick at a time through a
//! [`run::Runner`], spawning, steering, and vanishing bullets through host
//! callbacks.
//!
//! ```no_run
//! use bulletml::data::BulletML;
//! use bulletml::run::{Runner, RunnerOptions};
//!
//! let doc = BulletML::load_str(
//!     r#"<bulletml><action label="top"><fire><bullet/></fire></action></bulletml>"#,
//! )?;
//!
//! let mut runner = Runner::new(
//!     &doc,
//!     RunnerOptions {
//!         on_bullet_fired: Box::new(|bullet, _cx| {
//!             println!("spawned at {:?}", bullet.position());
//!             Ok(())
//!         }),
//!         current_shoot_position: Box::new(|| Ok((120., 40.))),
//!         current_target_position: Box::new(|| Ok((120., 400.))),
//!         default_bullet_speed: 1.5,
//!         random: None,
//!         rank: 0.5,
//!     },
//! )?;
//!
//! runner.update()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]

pub mod data;
mod parse;
pub mod run;
