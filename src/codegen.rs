use std::future::Future;

use rand::Rng;

use crate::error::LinkError;

/// Case-sensitive alphanumerics: 62 symbols.
pub const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// 62^7 ≈ 3.5 × 10^12 codes.
pub const DEFAULT_CODE_LENGTH: usize = 7;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Upper bound on any code the resolver will look up, whatever length new
/// codes are currently minted at.
pub const MAX_CODE_LENGTH: usize = 32;

/// Produces random short codes and claims them through an atomic
/// insert-if-absent supplied by the caller.
#[derive(Debug, Clone)]
pub struct CodeGenerator {
    length: usize,
    max_attempts: u32,
    alphabet: &'static [u8],
}

impl CodeGenerator {
    pub fn new(length: usize, max_attempts: u32) -> Self {
        Self {
            length,
            max_attempts: max_attempts.max(1),
            alphabet: ALPHABET,
        }
    }

    /// Restrict the symbols codes are drawn from. Mostly useful to force
    /// collisions in tests.
    pub fn with_alphabet(mut self, alphabet: &'static [u8]) -> anyhow::Result<Self> {
        anyhow::ensure!(!alphabet.is_empty(), "code alphabet must not be empty");
        self.alphabet = alphabet;
        Ok(self)
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Draw one random code. Uniqueness is not checked here.
    pub fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.length)
            .map(|_| self.alphabet[rng.gen_range(0..self.alphabet.len())] as char)
            .collect()
    }

    /// Generate codes and hand each one to `claim` until a claim succeeds.
    ///
    /// `claim` must perform an atomic insert-if-absent against every code ever
    /// issued and return `Ok(None)` when the code is already taken. After
    /// `max_attempts` collisions this gives up with `CodeSpaceExhausted`.
    pub async fn allocate<T, F, Fut>(&self, mut claim: F) -> Result<T, LinkError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<Option<T>, LinkError>>,
    {
        for attempt in 1..=self.max_attempts {
            let code = self.generate();
            match claim(code.clone()).await? {
                Some(claimed) => return Ok(claimed),
                None => {
                    tracing::debug!(
                        "Short code '{}' already issued (attempt {}/{})",
                        code,
                        attempt,
                        self.max_attempts
                    );
                }
            }
        }

        tracing::error!(
            "Gave up allocating a short code after {} collisions (length {})",
            self.max_attempts,
            self.length
        );
        Err(LinkError::CodeSpaceExhausted {
            attempts: self.max_attempts,
        })
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_LENGTH, DEFAULT_MAX_ATTEMPTS)
    }
}

/// Cheap syntactic check so obviously bogus paths never reach the store.
pub fn is_plausible_code(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= MAX_CODE_LENGTH
        && code.bytes().all(|b| b.is_ascii_alphanumeric())
}
