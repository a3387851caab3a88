use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Standard unit count on a stack.
pub type Units = u64;
/// Token amount in the ledger's smallest denomination.
pub type Amount = u128;
/// Effective combat power (units plus weighted reapers).
pub type Power = u128;

/// Power of one reaper measured in standard units.
pub const REAPER_MULTIPLIER: u64 = 666;
/// Basis-points denominator (10,000 = 100%).
pub const BPS_DENOM: u32 = 10_000;

/// Policy parameters of the external rule set that the engine mirrors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyParams {
    pub reaper_multiplier: u64,
    /// Gross bounty accrued per defending unit at multiplier 1.
    pub bounty_per_unit: u64,
    /// Stack age (blocks) per bounty multiplier step.
    pub blocks_per_multiplier: u64,
    pub max_multiplier: u64,
    /// Flat fee charged per transfer, if any.
    pub move_fee: Amount,
}

impl Default for EconomyParams {
    fn default() -> Self {
        Self {
            reaper_multiplier: REAPER_MULTIPLIER,
            bounty_per_unit: 666,
            blocks_per_multiplier: 1_080,
            max_multiplier: 20,
            move_fee: 0,
        }
    }
}

/// Constants read from the ledger once at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConstants {
    pub cost_per_unit: Amount,
    pub burn_bps: u32,
}

pub fn effective_power(units: Units, reapers: Units, reaper_multiplier: u64) -> Power {
    units as Power + reapers as Power * reaper_multiplier as Power
}

pub fn spawn_cost(units: Units, cost_per_unit: Amount) -> Amount {
    (units as Amount).saturating_mul(cost_per_unit)
}

/// `max(ceil(target_power × multiplier), floor)`, saturating at `Units::MAX`.
pub fn required_force(target_power: Power, multiplier: Multiplier, floor: Units) -> Units {
    let scaled = target_power.saturating_mul(multiplier.bps() as Power);
    let denom = BPS_DENOM as Power;
    let ceil = scaled / denom + if scaled % denom == 0 { 0 } else { 1 };
    let force = Units::try_from(ceil).unwrap_or(Units::MAX);
    force.max(floor)
}

/// Gross bounty minus the burn, with the burn rounded down as the ledger does.
pub fn net_bounty(gross: Amount, burn_bps: u32) -> Amount {
    let burn = gross.saturating_mul(burn_bps as Amount) / BPS_DENOM as Amount;
    gross.saturating_sub(burn)
}

/// `(net_bounty - cost) / cost`; a zero cost is an unbounded return.
pub fn roi(net_bounty: Amount, cost: Amount) -> Roi {
    if cost == 0 {
        return Roi::Unbounded;
    }
    Roi::Finite {
        gain: to_signed(net_bounty) - to_signed(cost),
        cost,
    }
}

fn to_signed(amount: Amount) -> i128 {
    i128::try_from(amount).unwrap_or(i128::MAX)
}

/// Bounty multiplier clamp(age / blocks_per_multiplier, 1, max_multiplier).
pub fn bounty_multiplier(age: u64, params: &EconomyParams) -> u64 {
    let steps = if params.blocks_per_multiplier == 0 {
        params.max_multiplier
    } else {
        age / params.blocks_per_multiplier
    };
    steps.clamp(1, params.max_multiplier.max(1))
}

/// Gross bounty estimate for a stack whose pending bounty the ledger did not report.
pub fn estimate_gross_bounty(units: Units, age: u64, params: &EconomyParams) -> Amount {
    (units as Amount)
        .saturating_mul(params.bounty_per_unit as Amount)
        .saturating_mul(bounty_multiplier(age, params) as Amount)
}

/// Overcommitment factor in basis points (30000 = 3×).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Multiplier(u32);

impl Multiplier {
    pub const fn from_bps(bps: u32) -> Self {
        Self(bps)
    }

    pub const fn whole(times: u32) -> Self {
        Self(times * BPS_DENOM)
    }

    pub const fn bps(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / BPS_DENOM;
        let frac = self.0 % BPS_DENOM;
        if frac == 0 {
            write!(f, "{}x", whole)
        } else {
            let digits = format!("{:04}", frac);
            write!(f, "{}.{}x", whole, digits.trim_end_matches('0'))
        }
    }
}

impl FromStr for Multiplier {
    type Err = String;

    /// Accepts `3`, `2.5`, `2.5x` or `25000bps`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().to_lowercase();
        if let Some(raw) = trimmed.strip_suffix("bps") {
            let bps = raw
                .trim()
                .parse::<u32>()
                .map_err(|_| format!("invalid basis points '{}'", raw))?;
            return Ok(Multiplier(bps));
        }

        let raw = trimmed.trim_end_matches('x');
        let (whole, frac) = match raw.split_once('.') {
            Some((w, f)) => (w, f),
            None => (raw, ""),
        };
        if frac.len() > 4 {
            return Err("multiplier supports at most 4 decimal places".into());
        }
        let whole = whole
            .parse::<u32>()
            .map_err(|_| format!("invalid multiplier '{}'", s))?;
        let frac_bps = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<4}", frac);
            padded
                .parse::<u32>()
                .map_err(|_| format!("invalid multiplier '{}'", s))?
        };
        whole
            .checked_mul(BPS_DENOM)
            .and_then(|w| w.checked_add(frac_bps))
            .map(Multiplier)
            .ok_or_else(|| format!("multiplier '{}' too large", s))
    }
}

/// Return on investment kept as an exact ratio so rankings never depend on
/// floating-point rounding.
#[derive(Clone, Copy, Debug)]
pub enum Roi {
    Finite { gain: i128, cost: Amount },
    Unbounded,
}

impl Roi {
    /// Threshold helper: `bps` of 10,000 (e.g. 5000 = +50%).
    pub fn from_bps(bps: i64) -> Self {
        Roi::Finite {
            gain: bps as i128,
            cost: BPS_DENOM as Amount,
        }
    }

    /// Human-readable percentage. Display only.
    pub fn percent(&self) -> f64 {
        match self {
            Roi::Finite { gain, cost } => *gain as f64 / *cost as f64 * 100.0,
            Roi::Unbounded => f64::INFINITY,
        }
    }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Roi::Finite { .. } => write!(f, "{:.2}%", self.percent()),
            Roi::Unbounded => write!(f, "inf"),
        }
    }
}

impl PartialEq for Roi {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Roi {}

impl PartialOrd for Roi {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Roi {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Roi::Unbounded, Roi::Unbounded) => Ordering::Equal,
            (Roi::Unbounded, _) => Ordering::Greater,
            (_, Roi::Unbounded) => Ordering::Less,
            (Roi::Finite { gain: a, cost: b }, Roi::Finite { gain: c, cost: d }) => {
                cmp_signed_ratio(*a, *b, *c, *d)
            }
        }
    }
}

fn cmp_signed_ratio(a: i128, b: u128, c: i128, d: u128) -> Ordering {
    match (a < 0, c < 0) {
        (false, true) => Ordering::Greater,
        (true, false) => Ordering::Less,
        (false, false) => cmp_ratio(a.unsigned_abs(), b, c.unsigned_abs(), d),
        (true, true) => cmp_ratio(c.unsigned_abs(), d, a.unsigned_abs(), b),
    }
}

/// Compares a/b with c/d (b, d > 0) without overflowing, by walking the
/// continued-fraction expansions of both sides.
fn cmp_ratio(mut a: u128, mut b: u128, mut c: u128, mut d: u128) -> Ordering {
    loop {
        let (qa, ra) = (a / b, a % b);
        let (qc, rc) = (c / d, c % d);
        if qa != qc {
            return qa.cmp(&qc);
        }
        match (ra == 0, rc == 0) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {
                // ra/b vs rc/d has the same order as d/rc vs b/ra.
                (a, b, c, d) = (d, rc, b, ra);
            }
        }
    }
}

/// Formulas bound to one process's constants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Economy {
    pub params: EconomyParams,
    pub constants: LedgerConstants,
}

impl Economy {
    pub fn new(params: EconomyParams, constants: LedgerConstants) -> Self {
        Self { params, constants }
    }

    pub fn power(&self, units: Units, reapers: Units) -> Power {
        effective_power(units, reapers, self.params.reaper_multiplier)
    }

    pub fn spawn_cost(&self, units: Units) -> Amount {
        spawn_cost(units, self.constants.cost_per_unit)
    }

    pub fn net_bounty(&self, gross: Amount) -> Amount {
        net_bounty(gross, self.constants.burn_bps)
    }

    pub fn gross_bounty(&self, units: Units, age: u64, reported: Option<Amount>) -> Amount {
        reported.unwrap_or_else(|| estimate_gross_bounty(units, age, &self.params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_power_weights_reapers() {
        assert_eq!(effective_power(50, 0, REAPER_MULTIPLIER), 50);
        assert_eq!(effective_power(10, 2, REAPER_MULTIPLIER), 10 + 2 * 666);
        for u in [0u64, 1, 7, 1_000] {
            for r in [0u64, 1, 3] {
                let p = effective_power(u, r, REAPER_MULTIPLIER);
                assert_eq!(p, u as u128 + r as u128 * 666);
                assert!(effective_power(u + 1, r, REAPER_MULTIPLIER) > p);
                assert!(effective_power(u, r + 1, REAPER_MULTIPLIER) > p);
            }
        }
    }

    #[test]
    fn required_force_uses_floor_for_small_targets() {
        assert_eq!(required_force(50, Multiplier::whole(3), 1_000), 1_000);
        assert_eq!(required_force(500, Multiplier::whole(3), 1_000), 1_500);
    }

    #[test]
    fn required_force_rounds_fractional_multipliers_up() {
        let m: Multiplier = "2.5".parse().unwrap();
        assert_eq!(required_force(3, m, 0), 8);
        assert_eq!(required_force(4, m, 0), 10);
        for power in 0..200u128 {
            let force = required_force(power, m, 7) as u128;
            assert!(force >= 7);
            assert!(force * 10_000 >= power * 25_000);
        }
    }

    #[test]
    fn net_bounty_rounds_burn_down() {
        assert_eq!(net_bounty(6_660, 666), 6_217);
        assert_eq!(net_bounty(0, 666), 0);
        assert_eq!(net_bounty(10_000, 0), 10_000);
    }

    #[test]
    fn spawn_cost_scales_linearly() {
        assert_eq!(spawn_cost(0, 20), 0);
        assert_eq!(spawn_cost(1_000, 20), 20_000);
    }

    #[test]
    fn roi_orders_by_exact_ratio() {
        assert!(roi(200, 100) > roi(150, 100));
        assert!(roi(150, 100) > roi(150, 120));
        assert!(roi(50, 100) < roi(100, 100));
        assert_eq!(roi(300, 100), roi(600, 200));
        assert!(roi(1, 0) > roi(u128::MAX / 2, 1));
    }

    #[test]
    fn roi_is_monotone_in_bounty_and_cost() {
        let net = 10_000u128;
        let mut prev = roi(net, 1);
        for cost in 2..500u128 {
            let next = roi(net, cost);
            assert!(next < prev, "cost {}", cost);
            prev = next;
        }
        let cost = 333u128;
        let mut prev = roi(0, cost);
        for net in 1..500u128 {
            let next = roi(net, cost);
            assert!(next > prev, "net {}", net);
            prev = next;
        }
    }

    #[test]
    fn roi_comparison_survives_huge_amounts() {
        let wei = 10u128.pow(18);
        let a = roi(9_000_000 * wei, 3_000_000 * wei);
        let b = roi(9_000_001 * wei, 3_000_000 * wei);
        assert!(b > a);
        assert!((a.percent() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn roi_threshold_from_bps() {
        assert!(roi(150, 100) >= Roi::from_bps(5_000));
        assert!(roi(149, 100) < Roi::from_bps(5_000));
        assert!(roi(90, 100) >= Roi::from_bps(-1_000));
    }

    #[test]
    fn multiplier_parsing_and_display() {
        assert_eq!("3".parse::<Multiplier>().unwrap().bps(), 30_000);
        assert_eq!("2.5x".parse::<Multiplier>().unwrap().bps(), 25_000);
        assert_eq!("12500bps".parse::<Multiplier>().unwrap().bps(), 12_500);
        assert!("abc".parse::<Multiplier>().is_err());
        assert!("1.23456".parse::<Multiplier>().is_err());
        assert_eq!(Multiplier::from_bps(25_000).to_string(), "2.5x");
        assert_eq!(Multiplier::whole(3).to_string(), "3x");
    }

    #[test]
    fn bounty_estimate_grows_with_age_and_caps() {
        let params = EconomyParams::default();
        assert_eq!(estimate_gross_bounty(10, 0, &params), 6_660);
        assert_eq!(estimate_gross_bounty(10, 2_160, &params), 13_320);
        assert_eq!(estimate_gross_bounty(1, 10_000_000, &params), 666 * 20);
    }
}
