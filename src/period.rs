// 🗓️ Period classification
// Maps the raw PERIODO code of a cheque to its payment stage.
//
//   "2-..." → first payment, "3-..." → second, "4-..." → third.
// "1-..." and anything else carry no stage marker in the rendered document.

use serde::{Deserialize, Serialize};

/// Mark written into the selected stage placeholder
pub const STAGE_MARK: &str = "✓";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStage {
    First,
    Second,
    Third,
}

impl PaymentStage {
    pub const ALL: [PaymentStage; 3] = [PaymentStage::First, PaymentStage::Second, PaymentStage::Third];

    /// Template placeholder name for this stage
    pub fn placeholder(&self) -> &'static str {
        match self {
            PaymentStage::First => "PRIMER_PAGO",
            PaymentStage::Second => "SEGUNDO_PAGO",
            PaymentStage::Third => "TERCER_PAGO",
        }
    }
}

/// Three-flag view of a classification; at most one flag is ever set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PaymentStageFlags {
    pub first_payment: bool,
    pub second_payment: bool,
    pub third_payment: bool,
}

impl From<Option<PaymentStage>> for PaymentStageFlags {
    fn from(stage: Option<PaymentStage>) -> Self {
        PaymentStageFlags {
            first_payment: stage == Some(PaymentStage::First),
            second_payment: stage == Some(PaymentStage::Second),
            third_payment: stage == Some(PaymentStage::Third),
        }
    }
}

/// Classify a period code. Spaces are ignored: "2 - 015" == "2-015".
pub fn classify_period(period: &str) -> Option<PaymentStage> {
    let compact: String = period.chars().filter(|c| *c != ' ').collect();

    if compact.starts_with("2-") {
        Some(PaymentStage::First)
    } else if compact.starts_with("3-") {
        Some(PaymentStage::Second)
    } else if compact.starts_with("4-") {
        Some(PaymentStage::Third)
    } else {
        None
    }
}

/// Placeholder values for the three stage fields: the mark on the selected one, "" elsewhere
pub fn stage_marks(period: &str) -> [(&'static str, &'static str); 3] {
    let stage = classify_period(period);
    PaymentStage::ALL.map(|s| {
        let mark = if Some(s) == stage { STAGE_MARK } else { "" };
        (s.placeholder(), mark)
    })
}
