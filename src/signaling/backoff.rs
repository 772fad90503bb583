use std::time::Duration;

use crate::config::ReconnectPolicy;

/// Экспоненциальная задержка между попытками переподключения
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
    delay: Duration,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        let delay = policy.initial_delay;
        Self {
            policy,
            attempt: 0,
            delay,
        }
    }

    /// Номер последней выданной попытки
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Следующая задержка; номер попытки растёт на единицу
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        let base = self.delay;

        let next_ms = (self.delay.as_millis() as f64 * self.policy.multiplier) as u64;
        self.delay = Duration::from_millis(next_ms).min(self.policy.max_delay);

        if self.policy.jitter {
            // ±10%
            let jitter = (rand::random::<f64>() - 0.5) * 0.2;
            Duration::from_millis((base.as_millis() as f64 * (1.0 + jitter)) as u64)
        } else {
            base
        }
    }

    /// После успешного подключения начинаем сначала
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.delay = self.policy.initial_delay;
    }
}
