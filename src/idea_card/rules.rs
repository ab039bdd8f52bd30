use serde::{Deserialize, Serialize};

use crate::time::TfRole;

/// A reference to a feature value at a given role/offset, as consumed by a
/// rule's comparison operands (spec §6, "rules.entry_long / ... : Boolean
/// expression trees over feature keys and operators").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRef {
    pub key: String,
    pub tf_role: TfRole,
    #[serde(default)]
    pub offset: usize,
}

/// A scalar operand: either a feature reference or a literal constant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Feature(FeatureRef),
    Literal(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    CrossAbove,
    CrossBelow,
}

/// A boolean expression tree over feature comparisons (spec §6). `CrossAbove`
/// / `CrossBelow` need the prior bar's values, so their evaluation always
/// reads `offset` and `offset + 1` from the left/right operands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleExpr {
    Compare {
        left: Operand,
        comparator: Comparator,
        right: Operand,
    },
    And(Vec<RuleExpr>),
    Or(Vec<RuleExpr>),
    Not(Box<RuleExpr>),
}

/// The three rule slots an `IdeaCard` may declare (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Rules {
    pub entry_long: Option<RuleExpr>,
    pub entry_short: Option<RuleExpr>,
    pub exit: Option<RuleExpr>,
}
