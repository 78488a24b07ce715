// Distributed under the OSI-approved BSD 2-Clause License.
// See accompanying LICENSE file for details.

//! Data entities
//!
//! These are the data structures used to represent a BulletML file.

mod data;
mod expression;
mod load;

pub use self::data::*;
pub use self::expression::{
    Evaluation, Expression, ExpressionContext, ExpressionError, Value,
};
pub use self::load::LoadError;
