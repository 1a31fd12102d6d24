//! Post-composition guards.
//!
//! These run on every composed board. Unlike upstream fetch failures they
//! do not degrade: a board that fails one is never returned.

use log::error;
use std::collections::{BTreeSet, HashSet};

use super::authority::scope_to_corridor;
use crate::models::{
    Advisory, CorridorBoard, CorridorConfig, PersistedSailingEvent, SailingKey, ScheduleSailing,
    ScheduleSourceKind, TodayAuthority,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardViolation {
    #[error("Board shows {actual} canceled sailings but the store has {expected} (missing: {})", missing.join(", "))]
    IncompleteCancellations {
        expected: usize,
        actual: usize,
        missing: Vec<String>,
    },

    #[error("{count} template sailings on an operator-only board")]
    TemplateUnderOperatorAuthority { count: usize },

    #[error("Board schedule source resolved to mixed under operator-only authority")]
    MixedSourceUnderOperatorAuthority,

    #[error("Sailings out of departure order at index {index}")]
    OutOfOrder { index: usize },

    #[error("Advisory repeated: {0}")]
    DuplicateAdvisory(String),
}

/// The board must show at least as many cancellations as the store holds
/// for this corridor's terminals.
pub fn check_cancellation_completeness(
    expected_events: &[PersistedSailingEvent],
    corridor: &CorridorConfig,
    sailings: &[ScheduleSailing],
) -> Result<(), GuardViolation> {
    let expected: BTreeSet<(String, String)> = scope_to_corridor(expected_events, corridor)
        .filter(|e| e.is_canceled())
        .map(|e| (e.identity.operator_id.to_string(), e.sailing_key().to_string()))
        .collect();
    let actual = sailings.iter().filter(|s| s.status.is_canceled()).count();

    if actual >= expected.len() {
        return Ok(());
    }

    let shown: HashSet<(String, String)> = sailings
        .iter()
        .filter(|s| s.status.is_canceled())
        .map(|s| {
            (
                s.operator_id.to_string(),
                SailingKey::new(&s.from_port, &s.to_port, &s.departure_time).to_string(),
            )
        })
        .collect();
    let missing = expected
        .iter()
        .filter(|k| !shown.contains(*k))
        .map(|(op, key)| format!("{}:{}", op, key))
        .collect();

    Err(GuardViolation::IncompleteCancellations {
        expected: expected.len(),
        actual,
        missing,
    })
}

/// No template sailing may appear under operator-only authority.
///
/// Always logged at error level. Only a hard failure when `strict`.
pub fn check_authority_purity(
    authority: TodayAuthority,
    sailings: &[ScheduleSailing],
    strict: bool,
) -> Result<(), GuardViolation> {
    if authority != TodayAuthority::OperatorOnly {
        return Ok(());
    }

    let count = sailings
        .iter()
        .filter(|s| s.schedule_source.is_template())
        .count();
    if count == 0 {
        return Ok(());
    }

    error!(
        "Authority rule bypassed: {} template sailings on an operator-only board",
        count
    );
    if strict {
        Err(GuardViolation::TemplateUnderOperatorAuthority { count })
    } else {
        Ok(())
    }
}

/// Single source label for the whole board.
pub fn canonical_schedule_source(
    authority: TodayAuthority,
    sailings: &[ScheduleSailing],
) -> ScheduleSourceKind {
    match authority {
        TodayAuthority::OperatorOnly => {
            let all_live = !sailings.is_empty()
                && sailings
                    .iter()
                    .all(|s| s.schedule_source == ScheduleSourceKind::OperatorStatus);
            if all_live {
                ScheduleSourceKind::OperatorStatus
            } else {
                ScheduleSourceKind::OperatorSnapshot
            }
        }
        TodayAuthority::TemplateOnly => {
            if sailings.iter().all(|s| s.schedule_source.is_template()) {
                ScheduleSourceKind::Template
            } else {
                ScheduleSourceKind::Mixed
            }
        }
    }
}

fn check_ordering(sailings: &[ScheduleSailing]) -> Result<(), GuardViolation> {
    match sailings
        .windows(2)
        .position(|w| w[0].departure_epoch_ms > w[1].departure_epoch_ms)
    {
        Some(index) => Err(GuardViolation::OutOfOrder { index: index + 1 }),
        None => Ok(()),
    }
}

fn check_advisories(advisories: &[Advisory]) -> Result<(), GuardViolation> {
    let mut seen = HashSet::new();
    for advisory in advisories {
        if !seen.insert(advisory.text.as_str()) {
            return Err(GuardViolation::DuplicateAdvisory(advisory.text.clone()));
        }
    }
    Ok(())
}

/// Run every guard against a composed board.
pub fn validate_board(
    board: &CorridorBoard,
    corridor: &CorridorConfig,
    expected_events: &[PersistedSailingEvent],
    strict_authority: bool,
) -> Result<(), GuardViolation> {
    let authority = board.provenance.today_authority;

    check_cancellation_completeness(expected_events, corridor, &board.sailings)?;
    check_authority_purity(authority, &board.sailings, strict_authority)?;
    if authority == TodayAuthority::OperatorOnly
        && board.provenance.schedule_source == ScheduleSourceKind::Mixed
    {
        return Err(GuardViolation::MixedSourceUnderOperatorAuthority);
    }
    check_ordering(&board.sailings)?;
    check_advisories(&board.advisories)
}
