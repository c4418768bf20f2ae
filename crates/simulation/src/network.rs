//! Simulated network between nodes.

use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use xachain_types::ServerId;

/// Network behaviour for a simulation.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Lower bound of one-way latency.
    pub min_latency: Duration,

    /// Upper bound of one-way latency.
    pub max_latency: Duration,

    /// Probability that a message is lost in transit.
    pub drop_rate: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            min_latency: Duration::from_millis(1),
            max_latency: Duration::from_millis(5),
            drop_rate: 0.0,
        }
    }
}

impl NetworkConfig {
    pub fn with_latency(mut self, min: Duration, max: Duration) -> Self {
        self.min_latency = min;
        self.max_latency = max.max(min);
        self
    }

    pub fn with_drop_rate(mut self, drop_rate: f64) -> Self {
        self.drop_rate = drop_rate.clamp(0.0, 1.0);
        self
    }
}

/// Latency, loss and partitions between servers.
///
/// Delivery on each directed link is FIFO: a message never arrives before
/// one sent earlier on the same link.
#[derive(Debug)]
pub struct SimulatedNetwork {
    config: NetworkConfig,
    /// Unordered pairs that cannot talk.
    partitions: HashSet<(ServerId, ServerId)>,
    /// Arrival time of the last message per directed link.
    last_arrival: HashMap<(ServerId, ServerId), Duration>,
}

impl SimulatedNetwork {
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            partitions: HashSet::new(),
            last_arrival: HashMap::new(),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Change message loss mid-run; already scheduled arrivals are kept.
    pub fn set_drop_rate(&mut self, drop_rate: f64) {
        self.config.drop_rate = drop_rate.clamp(0.0, 1.0);
    }

    fn pair(a: &ServerId, b: &ServerId) -> (ServerId, ServerId) {
        if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        }
    }

    /// Cut the link between `a` and `b` in both directions.
    pub fn partition(&mut self, a: &ServerId, b: &ServerId) {
        self.partitions.insert(Self::pair(a, b));
    }

    pub fn heal(&mut self, a: &ServerId, b: &ServerId) {
        self.partitions.remove(&Self::pair(a, b));
    }

    pub fn heal_all(&mut self) {
        self.partitions.clear();
    }

    pub fn is_partitioned(&self, a: &ServerId, b: &ServerId) -> bool {
        self.partitions.contains(&Self::pair(a, b))
    }

    /// Arrival time of a message sent now, or `None` if it is lost.
    pub fn arrival_time(
        &mut self,
        from: &ServerId,
        to: &ServerId,
        now: Duration,
        rng: &mut impl Rng,
    ) -> Option<Duration> {
        if self.is_partitioned(from, to) {
            return None;
        }
        if self.config.drop_rate > 0.0 && rng.gen_bool(self.config.drop_rate) {
            return None;
        }

        let latency = if self.config.max_latency > self.config.min_latency {
            rng.gen_range(self.config.min_latency..=self.config.max_latency)
        } else {
            self.config.min_latency
        };
        let link = (from.clone(), to.clone());
        let earliest = self
            .last_arrival
            .get(&link)
            .map(|last| *last + Duration::from_nanos(1))
            .unwrap_or_default();
        let arrival = (now + latency).max(earliest);
        self.last_arrival.insert(link, arrival);
        Some(arrival)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_partition_is_symmetric() {
        let (a, b) = (ServerId::new("tm-a"), ServerId::new("tm-b"));
        let mut network = SimulatedNetwork::new(NetworkConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        network.partition(&b, &a);
        assert!(network.arrival_time(&a, &b, Duration::ZERO, &mut rng).is_none());
        assert!(network.arrival_time(&b, &a, Duration::ZERO, &mut rng).is_none());

        network.heal(&a, &b);
        assert!(network.arrival_time(&a, &b, Duration::ZERO, &mut rng).is_some());
    }

    #[test]
    fn test_links_are_fifo() {
        let (a, b) = (ServerId::new("tm-a"), ServerId::new("tm-b"));
        let config = NetworkConfig::default()
            .with_latency(Duration::from_millis(1), Duration::from_millis(50));
        let mut network = SimulatedNetwork::new(config);
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        let mut last = Duration::ZERO;
        for i in 0..100 {
            let sent = Duration::from_micros(i * 10);
            let arrival = network.arrival_time(&a, &b, sent, &mut rng).unwrap();
            assert!(arrival > last);
            last = arrival;
        }
    }
}
