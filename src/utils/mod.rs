//! Shared helpers
pub mod expression;
pub mod header_converter;

pub use self::expression::{ExpressionContext, Segment, ValueExpression};
pub use self::header_converter::HeaderConverter;
