/// Counts primes in `[2, limit)` by trial division.
///
/// The workload is deliberately naive so every runtime does the same amount
/// of work. `limit` itself is never tested.
pub fn count_primes_below(limit: i64) -> u64 {
    let mut count = 0u64;
    for num in 2..limit {
        if is_prime(num) {
            count += 1;
        }
    }
    count
}

// `divisor <= num / divisor` is `divisor * divisor <= num` without overflow.
fn is_prime(num: i64) -> bool {
    let mut divisor = 2i64;
    while divisor <= num / divisor {
        if num % divisor == 0 {
            return false;
        }
        divisor += 1;
    }
    true
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitParseError {
    raw: String,
    reason: String,
}

impl LimitParseError {
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for LimitParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid limit value '{}': {}", self.raw, self.reason)
    }
}

impl std::error::Error for LimitParseError {}

/// Parses the textual limit stored in the shared parameter.
///
/// Surrounding whitespace and a leading sign are accepted.
pub fn parse_limit(raw: &str) -> Result<i64, LimitParseError> {
    raw.trim().parse::<i64>().map_err(|error| LimitParseError {
        raw: raw.to_string(),
        reason: error.to_string(),
    })
}
