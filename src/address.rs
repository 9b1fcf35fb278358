use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Length of the random local part of a synthetic recipient
pub const LOCAL_PART_LEN: usize = 8;

/// Generates throwaway recipient addresses (`<8 lowercase letters>@<domain>`)
///
/// The random source is injectable so tests can seed it and assert exact
/// output. No collision checking is done: two calls (or two items of the
/// same call) may produce the same address.
#[derive(Debug, Clone)]
pub struct AddressGenerator<R = StdRng> {
    rng: R,
}

impl AddressGenerator<StdRng> {
    /// Generator seeded from the operating system
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    /// Reproducible generator, mainly for tests
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }
}

impl Default for AddressGenerator<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> AddressGenerator<R> {
    pub fn from_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Returns exactly `count` addresses for `domain`, in generation order.
    /// The domain is appended verbatim.
    pub fn generate(&mut self, domain: &str, count: usize) -> Vec<String> {
        let emails: Vec<String> = (0..count)
            .map(|_| format!("{}@{}", self.local_part(), domain))
            .collect();
        log::debug!("Generated emails: {:?}", emails);
        emails
    }

    fn local_part(&mut self) -> String {
        (0..LOCAL_PART_LEN)
            .map(|_| char::from(b'a' + self.rng.random_range(0..26u8)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::AddressGenerator;

    fn is_synthetic(address: &str, domain: &str) -> bool {
        match address.split_once('@') {
            Some((local, d)) => {
                d == domain && local.len() == 8 && local.bytes().all(|b| b.is_ascii_lowercase())
            }
            None => false,
        }
    }

    #[test]
    fn test_generate_count_and_shape() {
        let mut generator = AddressGenerator::new();
        let emails = generator.generate("example.com", 5);

        assert_eq!(emails.len(), 5);
        for email in &emails {
            assert!(is_synthetic(email, "example.com"), "unexpected address {email}");
        }
    }

    #[test]
    fn test_generate_zero_is_empty() {
        let mut generator = AddressGenerator::seeded(1);
        assert!(generator.generate("example.com", 0).is_empty());
    }

    #[test]
    fn test_domain_is_taken_literally() {
        let mut generator = AddressGenerator::seeded(7);
        let emails = generator.generate("Sub.Example.ORG", 3);
        assert!(emails.iter().all(|e| e.ends_with("@Sub.Example.ORG")));
    }

    #[test]
    fn test_seeded_generators_agree() {
        let a = AddressGenerator::seeded(42).generate("target.com", 4);
        let b = AddressGenerator::seeded(42).generate("target.com", 4);
        assert_eq!(a, b);
    }

    #[test]
    fn test_repeated_calls_keep_working() {
        let mut generator = AddressGenerator::seeded(3);
        for n in 0..20 {
            assert_eq!(generator.generate("y.com", n).len(), n);
        }
    }
}
