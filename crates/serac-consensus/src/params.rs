//! Consensus parameters.

use serde::{Deserialize, Serialize};

/// Parameters shared by every Snowball-family instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameters {
    /// Sample size per poll (K).
    pub k: usize,

    /// Quorum size (alpha): votes required for a successful poll.
    pub alpha: usize,

    /// Consecutive successes required to finalize a virtuous choice.
    pub beta_virtuous: usize,

    /// Consecutive successes required to finalize a rogue choice.
    pub beta_rogue: usize,

    /// Pull queries kept in flight for the current preference.
    pub concurrent_repolls: usize,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            k: 20,
            alpha: 14,
            beta_virtuous: 15,
            beta_rogue: 20,
            concurrent_repolls: 2,
        }
    }
}

impl Parameters {
    /// Creates parameters with the given thresholds and default repoll count.
    pub fn new(k: usize, alpha: usize, beta_virtuous: usize, beta_rogue: usize) -> Self {
        Self {
            k,
            alpha,
            beta_virtuous,
            beta_rogue,
            concurrent_repolls: 1,
        }
    }

    /// Validates the constraints between the parameters:
    /// K >= 1, ceil(K/2)+1 <= alpha <= K, 1 <= beta_virtuous <= beta_rogue,
    /// and 1 <= concurrent_repolls <= K.
    pub fn validate(&self) -> Result<(), String> {
        if self.k == 0 {
            return Err("k must be at least 1".into());
        }
        let majority = self.k / 2 + 1;
        if self.alpha < majority {
            return Err(format!(
                "alpha {} must be at least a majority of k ({majority})",
                self.alpha
            ));
        }
        if self.alpha > self.k {
            return Err(format!("alpha {} exceeds k {}", self.alpha, self.k));
        }
        if self.beta_virtuous == 0 {
            return Err("beta_virtuous must be at least 1".into());
        }
        if self.beta_rogue < self.beta_virtuous {
            return Err(format!(
                "beta_rogue {} must be at least beta_virtuous {}",
                self.beta_rogue, self.beta_virtuous
            ));
        }
        if self.concurrent_repolls == 0 || self.concurrent_repolls > self.k {
            return Err(format!(
                "concurrent_repolls {} must be in [1, k]",
                self.concurrent_repolls
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(Parameters::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_k() {
        let p = Parameters {
            k: 0,
            ..Default::default()
        };
        assert!(p.validate().is_err());
    }

    #[test]
    fn alpha_must_be_majority() {
        // k = 4 requires alpha >= 3.
        let p = Parameters::new(4, 2, 1, 1);
        assert!(p.validate().is_err());
        let p = Parameters::new(4, 3, 1, 1);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn alpha_bounded_by_k() {
        let p = Parameters::new(3, 4, 1, 1);
        assert!(p.validate().is_err());
    }

    #[test]
    fn beta_ordering() {
        let p = Parameters::new(5, 4, 3, 2);
        assert!(p.validate().is_err());
    }

    #[test]
    fn repolls_bounded_by_k() {
        let p = Parameters {
            concurrent_repolls: 25,
            ..Default::default()
        };
        assert!(p.validate().is_err());
    }
}
