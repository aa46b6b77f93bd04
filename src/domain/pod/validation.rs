use crate::api::engine_dto::{ValidationOperatorDto, ValidationRuleDto};
use crate::domain::pod::expression::{Variables, evaluate_operand};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOperator {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
}

impl ValidationOperator {
    pub fn holds(&self, left: i64, right: i64) -> bool {
        match self {
            ValidationOperator::Eq => left == right,
            ValidationOperator::Lt => left < right,
            ValidationOperator::Le => left <= right,
            ValidationOperator::Gt => left > right,
            ValidationOperator::Ge => left >= right,
            ValidationOperator::Ne => left != right,
        }
    }
}

impl From<ValidationOperatorDto> for ValidationOperator {
    fn from(dto: ValidationOperatorDto) -> Self {
        match dto {
            ValidationOperatorDto::Eq => ValidationOperator::Eq,
            ValidationOperatorDto::Lt => ValidationOperator::Lt,
            ValidationOperatorDto::Le => ValidationOperator::Le,
            ValidationOperatorDto::Gt => ValidationOperator::Gt,
            ValidationOperatorDto::Ge => ValidationOperator::Ge,
            ValidationOperatorDto::Ne => ValidationOperator::Ne,
        }
    }
}

/// An admin rule such as `{{USER_GPU}} LE {{K8_GPU}}`, checked for every task at submission.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRule {
    pub operator: ValidationOperator,
    pub left_operand: String,
    pub right_operand: String,
    pub assert_message: String,
}

impl From<&ValidationRuleDto> for ValidationRule {
    fn from(dto: &ValidationRuleDto) -> Self {
        ValidationRule {
            operator: dto.operator.into(),
            left_operand: dto.left_operand.clone(),
            right_operand: dto.right_operand.clone(),
            assert_message: dto.assert_message.clone(),
        }
    }
}

impl ValidationRule {
    /// Checks the rule for `task`. A rule whose operands cannot be evaluated fails the same
    /// way a violated rule does, with the evaluation error appended.
    pub fn check(&self, task: &str, variables: &Variables) -> Result<()> {
        let outcome = evaluate_operand(&self.left_operand, variables)
            .and_then(|left| evaluate_operand(&self.right_operand, variables).map(|right| self.operator.holds(left, right)));

        match outcome {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::ResourceValidationError { task: task.to_string(), message: self.assert_message.clone() }),
            Err(e) => Err(Error::ResourceValidationError { task: task.to_string(), message: format!("{} ({})", self.assert_message, e) }),
        }
    }
}

/// Checks every rule in order and reports the first violation.
pub fn check_all<'a>(rules: impl IntoIterator<Item = &'a ValidationRule>, task: &str, variables: &Variables) -> Result<()> {
    for rule in rules {
        rule.check(task, variables)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pod::expression::VariableValue;

    fn rule(operator: ValidationOperator, left: &str, right: &str) -> ValidationRule {
        ValidationRule { operator, left_operand: left.to_string(), right_operand: right.to_string(), assert_message: "too big".to_string() }
    }

    #[test]
    fn static_and_dynamic_comparisons() {
        let mut vars = Variables::new();
        vars.insert("USER_MEMORY".to_string(), VariableValue::Number(32 << 30));
        vars.insert("K8_MEMORY".to_string(), VariableValue::Number(16 << 30));

        assert!(rule(ValidationOperator::Le, "{{USER_MEMORY}}", "64Gi").check("t", &vars).is_ok());

        let err = rule(ValidationOperator::Le, "{{USER_MEMORY}}", "{{K8_MEMORY}}").check("t", &vars).unwrap_err();
        match err {
            Error::ResourceValidationError { task, message } => {
                assert_eq!(task, "t");
                assert_eq!(message, "too big");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn unknown_variable_fails_the_rule() {
        let vars = Variables::new();
        let err = rule(ValidationOperator::Eq, "{{USER_GPU}}", "0").check("t", &vars).unwrap_err();
        assert!(matches!(err, Error::ResourceValidationError { .. }));
    }
}
