//! Presentation-side derivations over a [`Project`]: labels, countdowns,
//! progress, projected returns and which actions a phase offers.
//!
//! Every function here is pure. Time is passed in as Unix seconds so the
//! results are reproducible.

use alloy_primitives::{Address, U256};
use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::actions::Action;
use crate::types::{Phase, Position, Project};
use crate::units::format_amount;

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

// ─────────────────────────────────────────────────────────
// Time
// ─────────────────────────────────────────────────────────

/// Seconds from `now` until a chain timestamp, saturating at the `i64` range.
fn seconds_until(target: u64, now: i64) -> i64 {
    i64::try_from(target).unwrap_or(i64::MAX).saturating_sub(now)
}

/// `"Expired"` once `target` has passed, otherwise `"Xd Yh Zm"` with zero
/// components left out. Minutes are always shown when nothing else is.
pub fn format_time_remaining(target: u64, now: i64) -> String {
    let diff = seconds_until(target, now);
    if diff <= 0 {
        return "Expired".to_string();
    }

    let days = diff / DAY;
    let hours = (diff % DAY) / HOUR;
    let minutes = (diff % HOUR) / MINUTE;

    let mut parts = Vec::with_capacity(3);
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 || parts.is_empty() {
        parts.push(format!("{minutes}m"));
    }
    parts.join(" ")
}

/// Countdown to the repayment deadline in whole days, rounded up, with
/// 30-day months past the first month: `"12d"`, `"2m 5d"`, `"Available"`.
pub fn format_repayment_countdown(max_repayment_time: u64, now: i64) -> String {
    let secs = seconds_until(max_repayment_time, now);
    if secs <= 0 {
        return "Available".to_string();
    }
    let days = (secs - 1) / DAY + 1;
    if days < 30 {
        format!("{days}d")
    } else {
        format!("{}m {}d", days / 30, days % 30)
    }
}

/// `"25 Oct 2025"` (UTC).
pub fn format_date(timestamp: u64) -> String {
    format_utc(timestamp, "%-d %b %Y")
}

/// `"25 Oct 2025, 14:30"` (UTC).
pub fn format_date_time(timestamp: u64) -> String {
    format_utc(timestamp, "%-d %b %Y, %H:%M")
}

fn format_utc(timestamp: u64, pattern: &str) -> String {
    i64::try_from(timestamp)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format(pattern).to_string())
        .unwrap_or_else(|| "-".to_string())
}

// ─────────────────────────────────────────────────────────
// Amounts
// ─────────────────────────────────────────────────────────

/// Expected payout of a project at its advertised return.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectReturns {
    pub expected_payout: U256,
    pub net_profit: U256,
    /// `0.0` when nothing has been sold.
    pub roi_percent: f64,
}

/// `sold * (100 + percent) / 100`, floored.
pub fn expected_payout(total_sold: U256, possible_return: u16) -> U256 {
    total_sold * U256::from(100u64 + u64::from(possible_return)) / U256::from(100u64)
}

pub fn project_returns(total_sold: U256, possible_return: u16) -> ProjectReturns {
    let payout = expected_payout(total_sold, possible_return);
    let profit = payout.saturating_sub(total_sold);
    ProjectReturns {
        expected_payout: payout,
        net_profit: profit,
        roi_percent: basis_points(profit, total_sold) as f64 / 100.0,
    }
}

/// Percentage of `target` reached, in `[0, 100]`. Zero target reads as 0.
pub fn funding_progress(current: U256, target: U256) -> f64 {
    basis_points(current, target).min(10_000) as f64 / 100.0
}

/// Amount still missing to reach the softcap.
pub fn available_to_softcap(total_sold: U256, soft_cap: U256) -> U256 {
    soft_cap.saturating_sub(total_sold)
}

fn basis_points(part: U256, whole: U256) -> u64 {
    if whole.is_zero() {
        return 0;
    }
    u64::try_from(part.saturating_mul(U256::from(10_000u64)) / whole).unwrap_or(u64::MAX)
}

fn display(value: U256, decimals: u8) -> String {
    format_amount(value, decimals).unwrap_or_else(|_| value.to_string())
}

// ─────────────────────────────────────────────────────────
// Phase
// ─────────────────────────────────────────────────────────

pub fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Buying => "Active",
        Phase::SoftcapReached => "Funded",
        Phase::WaitingRepayment => "In Construction",
        Phase::ClaimReady => "Completed",
        Phase::RefundAvailable => "Refund",
    }
}

/// What an investor can do with a project in `phase`, if anything.
pub fn investor_action(phase: Phase) -> Option<Action> {
    match phase {
        Phase::Buying | Phase::SoftcapReached => Some(Action::BuyShares),
        Phase::ClaimReady => Some(Action::ClaimReturns),
        Phase::RefundAvailable => Some(Action::WithdrawFailedRaise),
        Phase::WaitingRepayment => None,
    }
}

/// Owner operations available in `phase`.
pub fn admin_actions(phase: Phase) -> &'static [Action] {
    match phase {
        Phase::Buying => &[Action::FinishBuyingTime],
        Phase::SoftcapReached => &[Action::WithdrawRaisedFunds, Action::FinishBuyingTime],
        Phase::WaitingRepayment => &[Action::ReturnFunds],
        Phase::ClaimReady | Phase::RefundAvailable => &[],
    }
}

// ─────────────────────────────────────────────────────────
// Composite views
// ─────────────────────────────────────────────────────────

/// One token per stablecoin unit invested.
pub fn position(project: &Project, holder: Address, tokens: U256) -> Position {
    let holds = !tokens.is_zero();
    Position {
        project: project.address,
        holder,
        tokens_owned: tokens,
        invested: tokens,
        projected_value: expected_payout(tokens, project.possible_return),
        can_claim: holds && project.phase == Phase::ClaimReady,
        can_refund: holds && project.phase == Phase::RefundAvailable,
    }
}

/// Display-ready project card. Amounts are formatted decimal strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectView {
    pub address: Address,
    pub owner: Address,
    pub name: String,
    pub url: String,
    pub phase: Phase,
    pub phase_code: u8,
    pub phase_label: String,
    pub total_fractions: String,
    pub soft_cap: String,
    pub total_sold: String,
    pub total_reinvested: String,
    pub available_to_softcap: String,
    pub progress_percent: f64,
    pub softcap_progress_percent: f64,
    pub possible_return: u16,
    pub expected_payout: String,
    pub net_profit: String,
    pub roi_percent: f64,
    pub start_date: String,
    pub buying_period_end: String,
    pub max_repayment_date: String,
    pub time_remaining: String,
    /// Only while the project is under construction.
    pub repayment_countdown: Option<String>,
    pub investor_action: Option<Action>,
    pub admin_actions: Vec<Action>,
}

impl ProjectView {
    pub fn build(project: &Project, decimals: u8, now: i64) -> Self {
        let returns = project_returns(project.total_sold, project.possible_return);
        Self {
            address: project.address,
            owner: project.owner,
            name: project.name.clone(),
            url: project.url.clone(),
            phase: project.phase,
            phase_code: project.phase.code(),
            phase_label: phase_label(project.phase).to_string(),
            total_fractions: display(project.total_fractions, decimals),
            soft_cap: display(project.soft_cap, decimals),
            total_sold: display(project.total_sold, decimals),
            total_reinvested: display(project.total_reinvested, decimals),
            available_to_softcap: display(
                available_to_softcap(project.total_sold, project.soft_cap),
                decimals,
            ),
            progress_percent: funding_progress(project.total_sold, project.total_fractions),
            softcap_progress_percent: funding_progress(project.total_sold, project.soft_cap),
            possible_return: project.possible_return,
            expected_payout: display(returns.expected_payout, decimals),
            net_profit: display(returns.net_profit, decimals),
            roi_percent: returns.roi_percent,
            start_date: format_date(project.start_time),
            buying_period_end: format_date_time(project.buying_period_end),
            max_repayment_date: format_date(project.max_repayment_time),
            time_remaining: format_time_remaining(project.buying_period_end, now),
            repayment_countdown: project
                .phase
                .is_construction()
                .then(|| format_repayment_countdown(project.max_repayment_time, now)),
            investor_action: investor_action(project.phase),
            admin_actions: admin_actions(project.phase).to_vec(),
        }
    }
}

/// List filter: case-insensitive substring over name and URL, plus an
/// optional exact phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFilter {
    pub search: Option<String>,
    pub phase: Option<Phase>,
}

impl ProjectFilter {
    pub fn matches(&self, project: &Project) -> bool {
        if let Some(phase) = self.phase {
            if project.phase != phase {
                return false;
            }
        }
        match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(term) => {
                let term = term.to_lowercase();
                project.name.to_lowercase().contains(&term)
                    || project.url.to_lowercase().contains(&term)
            }
        }
    }

    pub fn apply<'a>(&'a self, projects: &'a [Project]) -> impl Iterator<Item = &'a Project> + 'a {
        projects.iter().filter(move |p| self.matches(p))
    }
}
