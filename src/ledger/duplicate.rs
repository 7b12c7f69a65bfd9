use super::{DuplicateKind, DuplicateWarning};
use crate::model::{NewPayment, Payment};

/// Guards payment entry against recording the same money twice.
///
/// Two rules, checked in order: a reference equal to an existing payment's
/// (ignoring case and surrounding whitespace), or the same player, amount and
/// payment date as an existing payment.
pub struct DuplicateDetector;

impl DuplicateDetector {
    pub fn check<'a>(
        candidate: &NewPayment,
        existing: impl IntoIterator<Item = &'a Payment>,
    ) -> Option<DuplicateWarning> {
        let reference = candidate.reference.as_deref().map(normalize_reference);
        let mut same_shape = None;

        for payment in existing {
            if let (Some(wanted), Some(theirs)) = (&reference, payment.reference.as_deref()) {
                if !wanted.is_empty() && *wanted == normalize_reference(theirs) {
                    return Some(DuplicateWarning {
                        kind: DuplicateKind::Reference,
                        existing: Box::new(payment.clone()),
                    });
                }
            }
            if same_shape.is_none()
                && payment.player_id == candidate.player_id
                && payment.amount == candidate.amount
                && payment.payment_date == candidate.payment_date
            {
                same_shape = Some(payment);
            }
        }

        same_shape.map(|payment| DuplicateWarning {
            kind: DuplicateKind::PlayerAmountDate,
            existing: Box::new(payment.clone()),
        })
    }
}

pub(super) fn normalize_reference(reference: &str) -> String {
    reference.trim().to_uppercase()
}
