pub mod builder;
pub mod expression;
pub mod template;
pub mod validation;
