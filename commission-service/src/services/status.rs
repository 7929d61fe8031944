//! Verification status derivation.
//!
//! One pure function decides a commission's aggregate verification status and
//! payment eligibility. The verification engine, the event reactor and the
//! reversal path all go through it.

use crate::models::{
    Commission, Installment, PaymentDependency, PaymentPart, PaymentType, VerificationStatus,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DerivedStatus {
    pub status: VerificationStatus,
    pub eligible: bool,
}

impl DerivedStatus {
    fn fully_verified() -> Self {
        Self {
            status: VerificationStatus::FullyVerified,
            eligible: true,
        }
    }

    fn pending() -> Self {
        Self {
            status: VerificationStatus::PendingVerification,
            eligible: false,
        }
    }

    fn verified_if(condition: bool) -> Self {
        if condition {
            Self::fully_verified()
        } else {
            Self::pending()
        }
    }
}

/// Derive (status, eligible) from which installments are verified.
pub fn derive_status(
    has_first: bool,
    has_second: bool,
    payment_part: Option<PaymentPart>,
    dependency: PaymentDependency,
    payment_type: PaymentType,
) -> DerivedStatus {
    match payment_part {
        Some(PaymentPart::First) => return DerivedStatus::verified_if(has_first),
        Some(PaymentPart::Second) => return DerivedStatus::verified_if(has_second),
        None => {}
    }

    match dependency {
        PaymentDependency::BothPayments => match (has_first, has_second) {
            (true, true) => DerivedStatus::fully_verified(),
            (false, false) => DerivedStatus::pending(),
            _ => DerivedStatus {
                status: VerificationStatus::PartiallyVerified,
                eligible: payment_type == PaymentType::FirstPayment,
            },
        },
        PaymentDependency::FirstPaymentOnly => DerivedStatus::verified_if(has_first),
        PaymentDependency::SecondPaymentOnly => DerivedStatus::verified_if(has_second),
        PaymentDependency::AnyPayment => DerivedStatus::verified_if(has_first || has_second),
        PaymentDependency::None => DerivedStatus::fully_verified(),
    }
}

/// Never lower a commission's status during recomputation; only reversal can.
pub fn merge_monotonic(current: DerivedStatus, derived: DerivedStatus) -> DerivedStatus {
    if derived.status.rank() < current.status.rank() {
        current
    } else {
        derived
    }
}

/// Installments a commission's payout depends on.
pub fn required_installments(commission: &Commission) -> Vec<Installment> {
    match commission.payment_part {
        Some(part) => vec![part.installment()],
        None => match commission.payment_dependency_type {
            PaymentDependency::None => vec![],
            PaymentDependency::FirstPaymentOnly => vec![Installment::First],
            PaymentDependency::SecondPaymentOnly => vec![Installment::Second],
            PaymentDependency::BothPayments | PaymentDependency::AnyPayment => {
                vec![Installment::First, Installment::Second]
            }
        },
    }
}

/// Human-readable summary of which installments are verified or pending.
pub fn describe(commission: &Commission, has_first: bool, has_second: bool) -> String {
    let parts: Vec<String> = required_installments(commission)
        .into_iter()
        .map(|installment| {
            let verified = match installment {
                Installment::First => has_first,
                Installment::Second => has_second,
            };
            format!(
                "{}: {}",
                installment.label(),
                if verified { "verified" } else { "pending" }
            )
        })
        .collect();

    if parts.is_empty() {
        "No client payment dependency".to_string()
    } else {
        parts.join("; ")
    }
}

/// Recompute and store the commission's status, eligibility and timestamps.
///
/// With `monotonic` set the status never drops below the stored one.
pub fn apply_status(
    commission: &mut Commission,
    has_first: bool,
    has_second: bool,
    monotonic: bool,
    now: DateTime<Utc>,
) -> DerivedStatus {
    let derived = derive_status(
        has_first,
        has_second,
        commission.payment_part,
        commission.payment_dependency_type,
        commission.payment_type,
    );
    let current = DerivedStatus {
        status: commission.payment_verification_status,
        eligible: commission.is_eligible_for_payment,
    };
    let next = if monotonic {
        merge_monotonic(current, derived)
    } else {
        derived
    };

    for (installment, verified) in [(Installment::First, has_first), (Installment::Second, has_second)] {
        if verified && commission.verified_at(installment).is_none() {
            commission.set_verified_at(installment, Some(now));
        }
    }

    commission.payment_verification_status = next.status;
    commission.is_eligible_for_payment = next.eligible;
    commission.updated_utc = now;
    next
}
