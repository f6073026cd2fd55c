// Entry sizing: the staged order-quantity schedule

/// Ordered sequence of planned stage quantities, built once per cycle and
/// consumed by index as stages complete. Quantities are never recomputed
/// after the schedule is built.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSchedule {
    quantities: Vec<f64>,
    next: usize,
}

impl StageSchedule {
    /// Index of the next schedule entry to consume.
    pub fn stage(&self) -> usize {
        self.next
    }

    pub fn stage_max(&self) -> usize {
        self.quantities.len()
    }

    /// Quantity of the next stage, if any.
    pub fn peek(&self) -> Option<f64> {
        self.quantities.get(self.next).copied()
    }

    /// Retire the next stage, returning its quantity.
    pub fn consume(&mut self) -> Option<f64> {
        let qty = self.peek()?;
        self.next += 1;
        Some(qty)
    }

    pub fn is_exhausted(&self) -> bool {
        self.next == self.quantities.len()
    }

    pub fn quantities(&self) -> &[f64] {
        &self.quantities
    }
}

/// Build the staged quantity schedule from the available balance.
///
/// The running sum seeds with the exchange minimum and replicates it while
/// the sum is still at or below the minimum (guards against a minimum so
/// coarse that the first multiplicative step would be smaller than it).
/// After that each stage is `round(running_sum * growth_rate)` at the
/// minimum quantity's decimal scale, and the schedule stops before the sum
/// would exceed `balance * safety_factor / price * leverage`.
///
/// Pure and deterministic: same inputs always yield the same schedule. The
/// schedule may be empty when the balance cannot cover even one minimum-
/// sized order.
pub fn build_stage_schedule(
    balance: f64,
    price: f64,
    leverage: u32,
    growth_rate: f64,
    min_qty: f64,
    safety_factor: f64,
) -> StageSchedule {
    let mut quantities = Vec::new();

    if balance <= 0.0 || price <= 0.0 || min_qty <= 0.0 || growth_rate <= 0.0 {
        return StageSchedule { quantities, next: 0 };
    }

    let max_qty = balance * safety_factor / price * leverage as f64;
    let precision = decimal_places(min_qty);
    let mut sum = 0.0;

    loop {
        let next = if quantities.is_empty() || sum <= min_qty {
            min_qty
        } else {
            round_to(sum * growth_rate, precision)
        };
        if next <= 0.0 || sum + next > max_qty {
            break;
        }
        quantities.push(next);
        sum += next;
    }

    StageSchedule { quantities, next: 0 }
}

/// Number of decimal places of the exchange minimum quantity, used as the
/// rounding precision for every planned stage.
pub fn decimal_places(min_qty: f64) -> u32 {
    let formatted = format!("{:.8}", min_qty);
    let trimmed = formatted.trim_end_matches('0');
    match trimmed.split_once('.') {
        Some((_, frac)) => frac.len() as u32,
        None => 0,
    }
}

fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}
