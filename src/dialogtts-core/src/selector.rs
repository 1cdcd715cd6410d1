//! Voice selection.
//!
//! A [`VoiceSelector`] maps `(speaker, gender)` to a catalog voice according
//! to a [`SelectionPolicy`], restricted to the backends that are actually
//! usable for this run. One selector belongs to one conversation: fixed
//! assignments live exactly as long as the selector does.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::VoiceCatalog;
use crate::error::DialogueError;
use crate::voice::{BackendKind, Gender, VoiceIdentity};

/// How a voice is chosen for each utterance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    /// A speaker keeps the voice first drawn for them for the whole run.
    Fixed,
    /// Every utterance draws uniformly among the gender's voices.
    Random,
    /// Every utterance first draws a backend by weight, then a voice of
    /// that backend uniformly.
    #[default]
    GenderBalanced,
}

impl SelectionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionPolicy::Fixed => "fixed",
            SelectionPolicy::Random => "random",
            SelectionPolicy::GenderBalanced => "gender-balanced",
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "fixed" => Ok(SelectionPolicy::Fixed),
            "random" => Ok(SelectionPolicy::Random),
            "gender-balanced" | "gender-based" | "balanced" => Ok(SelectionPolicy::GenderBalanced),
            other => Err(format!(
                "unknown selection policy '{}' (expected fixed, random or gender-balanced)",
                other
            )),
        }
    }
}

/// Per-gender count of eligible voices.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GenderSummary {
    pub total: usize,
    pub per_backend: BTreeMap<BackendKind, usize>,
}

/// Eligible voices for one gender after backend restriction.
#[derive(Debug, Clone)]
struct VoicePool {
    voices: Vec<Arc<VoiceIdentity>>,
    by_backend: BTreeMap<BackendKind, Vec<Arc<VoiceIdentity>>>,
    /// Normalized backend weights over `by_backend` keys, in key order.
    backend_weights: Vec<(BackendKind, f64)>,
}

/// Picks voices for speakers. Not thread-safe; one instance per conversation.
pub struct VoiceSelector<R = StdRng> {
    policy: SelectionPolicy,
    pools: BTreeMap<Gender, VoicePool>,
    assignments: HashMap<(String, Gender), Arc<VoiceIdentity>>,
    rng: R,
}

impl VoiceSelector<StdRng> {
    /// Create a selector seeded from the operating system.
    pub fn from_os_rng(
        policy: SelectionPolicy,
        catalog: &VoiceCatalog,
        available: &BTreeSet<BackendKind>,
    ) -> Result<Self, DialogueError> {
        Self::new(policy, catalog, available, StdRng::from_os_rng())
    }

    /// Create a reproducible selector.
    pub fn seeded(
        policy: SelectionPolicy,
        catalog: &VoiceCatalog,
        available: &BTreeSet<BackendKind>,
        seed: u64,
    ) -> Result<Self, DialogueError> {
        Self::new(policy, catalog, available, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> VoiceSelector<R> {
    /// Create a selector over the voices of `available` backends.
    ///
    /// Fails if any gender is left without a voice, so a conversation never
    /// starts processing with a speaker that cannot be voiced.
    pub fn new(
        policy: SelectionPolicy,
        catalog: &VoiceCatalog,
        available: &BTreeSet<BackendKind>,
        rng: R,
    ) -> Result<Self, DialogueError> {
        let mut pools = BTreeMap::new();

        for gender in Gender::ALL {
            let voices: Vec<Arc<VoiceIdentity>> = catalog
                .voices(gender)
                .iter()
                .filter(|voice| available.contains(&voice.backend))
                .cloned()
                .collect();

            if voices.is_empty() {
                return Err(DialogueError::Config(format!(
                    "No {} voices available from backends [{}] (catalog has {} {} voice(s))",
                    gender,
                    available
                        .iter()
                        .map(BackendKind::as_str)
                        .collect::<Vec<_>>()
                        .join(", "),
                    catalog.voices(gender).len(),
                    gender
                )));
            }

            let mut by_backend: BTreeMap<BackendKind, Vec<Arc<VoiceIdentity>>> = BTreeMap::new();
            for voice in &voices {
                by_backend.entry(voice.backend).or_default().push(Arc::clone(voice));
            }

            let backends: BTreeSet<BackendKind> = by_backend.keys().copied().collect();
            let backend_weights = catalog.weights_for(&backends).into_iter().collect();

            pools.insert(
                gender,
                VoicePool {
                    voices,
                    by_backend,
                    backend_weights,
                },
            );
        }

        Ok(Self {
            policy,
            pools,
            assignments: HashMap::new(),
            rng,
        })
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Choose a voice for one utterance of `speaker`.
    pub fn select(
        &mut self,
        speaker: &str,
        gender: Gender,
    ) -> Result<Arc<VoiceIdentity>, DialogueError> {
        let voice = match self.policy {
            SelectionPolicy::Fixed => {
                let key = (speaker.to_string(), gender);
                if let Some(voice) = self.assignments.get(&key) {
                    return Ok(Arc::clone(voice));
                }
                let voice = self.draw_uniform(speaker, gender)?;
                self.assignments.insert(key, Arc::clone(&voice));
                voice
            }
            SelectionPolicy::Random => self.draw_uniform(speaker, gender)?,
            SelectionPolicy::GenderBalanced => self.draw_balanced(speaker, gender)?,
        };

        debug!(
            speaker,
            %gender,
            voice = %voice.name,
            backend = %voice.backend,
            policy = %self.policy,
            "selected voice"
        );
        Ok(voice)
    }

    fn draw_uniform(
        &mut self,
        speaker: &str,
        gender: Gender,
    ) -> Result<Arc<VoiceIdentity>, DialogueError> {
        let pool = pool_for(&self.pools, speaker, gender)?;
        pool.voices
            .choose(&mut self.rng)
            .cloned()
            .ok_or_else(|| DialogueError::Selection {
                speaker: speaker.to_string(),
                gender,
            })
    }

    fn draw_balanced(
        &mut self,
        speaker: &str,
        gender: Gender,
    ) -> Result<Arc<VoiceIdentity>, DialogueError> {
        let pool = pool_for(&self.pools, speaker, gender)?;

        let backend = if pool.backend_weights.len() == 1 {
            pool.backend_weights[0].0
        } else {
            let dist = WeightedIndex::new(pool.backend_weights.iter().map(|(_, w)| *w))
                .map_err(|e| {
                    DialogueError::Config(format!("Invalid backend weights for {}: {}", gender, e))
                })?;
            pool.backend_weights[dist.sample(&mut self.rng)].0
        };

        pool.by_backend
            .get(&backend)
            .and_then(|voices| voices.choose(&mut self.rng))
            .cloned()
            .ok_or_else(|| DialogueError::Selection {
                speaker: speaker.to_string(),
                gender,
            })
    }

    /// Current fixed assignments, keyed by `(speaker, gender)`.
    pub fn assignments(&self) -> &HashMap<(String, Gender), Arc<VoiceIdentity>> {
        &self.assignments
    }

    /// Forget every fixed assignment.
    pub fn reset(&mut self) {
        self.assignments.clear();
    }

    /// Eligible voice counts per gender and backend.
    pub fn summary(&self) -> BTreeMap<Gender, GenderSummary> {
        self.pools
            .iter()
            .map(|(gender, pool)| {
                let per_backend = pool
                    .by_backend
                    .iter()
                    .map(|(backend, voices)| (*backend, voices.len()))
                    .collect();
                (
                    *gender,
                    GenderSummary {
                        total: pool.voices.len(),
                        per_backend,
                    },
                )
            })
            .collect()
    }
}

fn pool_for<'a>(
    pools: &'a BTreeMap<Gender, VoicePool>,
    speaker: &str,
    gender: Gender,
) -> Result<&'a VoicePool, DialogueError> {
    pools
        .get(&gender)
        .filter(|pool| !pool.voices.is_empty())
        .ok_or_else(|| DialogueError::Selection {
            speaker: speaker.to_string(),
            gender,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(google_weight: f64, eleven_weight: f64) -> VoiceCatalog {
        let mut voices = Vec::new();
        for i in 0..20 {
            voices.push(
                VoiceIdentity::new(format!("google-f{i}"), BackendKind::Google, Gender::Female)
                    .with_param("tld", "com"),
            );
        }
        for i in 0..2 {
            voices.push(
                VoiceIdentity::new(format!("eleven-f{i}"), BackendKind::ElevenLabs, Gender::Female)
                    .with_param("voice_id", format!("f{i}")),
            );
        }
        voices.push(VoiceIdentity::new("google-m0", BackendKind::Google, Gender::Male));
        voices.push(
            VoiceIdentity::new("eleven-m0", BackendKind::ElevenLabs, Gender::Male)
                .with_param("voice_id", "m0"),
        );

        let weights = BTreeMap::from([
            (BackendKind::Google, google_weight),
            (BackendKind::ElevenLabs, eleven_weight),
        ]);
        VoiceCatalog::from_voices(voices, weights).unwrap()
    }

    fn all_backends() -> BTreeSet<BackendKind> {
        BackendKind::ALL.into_iter().collect()
    }

    #[test]
    fn test_fixed_returns_same_voice() {
        let catalog = catalog(0.5, 0.5);
        let mut selector =
            VoiceSelector::seeded(SelectionPolicy::Fixed, &catalog, &all_backends(), 7).unwrap();

        let first = selector.select("Jane", Gender::Female).unwrap();
        for _ in 0..50 {
            let again = selector.select("Jane", Gender::Female).unwrap();
            assert!(Arc::ptr_eq(&first, &again));
        }
        assert_eq!(selector.assignments().len(), 1);
    }

    #[test]
    fn test_fixed_reset_clears_assignments() {
        let catalog = catalog(0.5, 0.5);
        let mut selector =
            VoiceSelector::seeded(SelectionPolicy::Fixed, &catalog, &all_backends(), 1).unwrap();
        selector.select("Jane", Gender::Female).unwrap();
        selector.select("David", Gender::Male).unwrap();
        assert_eq!(selector.assignments().len(), 2);

        selector.reset();
        assert!(selector.assignments().is_empty());
    }

    #[test]
    fn test_fixed_assignments_are_per_selector() {
        let catalog = catalog(0.5, 0.5);
        let mut first =
            VoiceSelector::seeded(SelectionPolicy::Fixed, &catalog, &all_backends(), 1).unwrap();
        let second =
            VoiceSelector::seeded(SelectionPolicy::Fixed, &catalog, &all_backends(), 2).unwrap();
        first.select("Jane", Gender::Female).unwrap();
        assert!(second.assignments().is_empty());
    }

    #[test]
    fn test_random_produces_variety() {
        let catalog = catalog(0.5, 0.5);
        let mut selector =
            VoiceSelector::seeded(SelectionPolicy::Random, &catalog, &all_backends(), 42).unwrap();

        let names: BTreeSet<String> = (0..200)
            .map(|_| selector.select("Jane", Gender::Female).unwrap().name.clone())
            .collect();
        assert!(names.len() > 1);
        assert!(selector.assignments().is_empty());
    }

    #[test]
    fn test_gender_balanced_follows_backend_weights() {
        let catalog = catalog(0.8, 0.2);
        let mut selector = VoiceSelector::seeded(
            SelectionPolicy::GenderBalanced,
            &catalog,
            &all_backends(),
            12345,
        )
        .unwrap();

        let google = (0..1000)
            .filter(|_| {
                selector.select("Jane", Gender::Female).unwrap().backend == BackendKind::Google
            })
            .count();
        // Binomial(1000, 0.8) has sd ~12.6; allow a wide margin.
        assert!((740..=860).contains(&google), "google chosen {google} times");
    }

    #[test]
    fn test_gender_balanced_ignores_pool_size() {
        // 20 google voices against 2 elevenlabs voices, equal weights.
        let catalog = catalog(0.5, 0.5);
        let mut selector = VoiceSelector::seeded(
            SelectionPolicy::GenderBalanced,
            &catalog,
            &all_backends(),
            99,
        )
        .unwrap();

        let eleven = (0..1000)
            .filter(|_| {
                selector.select("Jane", Gender::Female).unwrap().backend == BackendKind::ElevenLabs
            })
            .count();
        assert!((420..=580).contains(&eleven), "elevenlabs chosen {eleven} times");
    }

    #[test]
    fn test_restriction_excludes_backend() {
        let catalog = catalog(0.8, 0.2);
        let only_eleven = BTreeSet::from([BackendKind::ElevenLabs]);

        for policy in [
            SelectionPolicy::Fixed,
            SelectionPolicy::Random,
            SelectionPolicy::GenderBalanced,
        ] {
            let mut selector = VoiceSelector::seeded(policy, &catalog, &only_eleven, 5).unwrap();
            for i in 0..200 {
                let speaker = format!("speaker{i}");
                let voice = selector.select(&speaker, Gender::Female).unwrap();
                assert_eq!(voice.backend, BackendKind::ElevenLabs);
            }
        }
    }

    #[test]
    fn test_empty_gender_fails_at_construction() {
        let voices = vec![
            VoiceIdentity::new("google-m", BackendKind::Google, Gender::Male),
            VoiceIdentity::new("eleven-f", BackendKind::ElevenLabs, Gender::Female)
                .with_param("voice_id", "f"),
        ];
        let catalog = VoiceCatalog::from_voices(voices, BTreeMap::new()).unwrap();

        let only_google = BTreeSet::from([BackendKind::Google]);
        let result = VoiceSelector::seeded(SelectionPolicy::Random, &catalog, &only_google, 0);
        match result {
            Err(DialogueError::Config(message)) => assert!(message.contains("female")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("selector construction should fail"),
        }

        let none = BTreeSet::new();
        assert!(VoiceSelector::seeded(SelectionPolicy::Fixed, &catalog, &none, 0).is_err());
    }

    #[test]
    fn test_seeded_selectors_are_reproducible() {
        let catalog = catalog(0.5, 0.5);
        let draw = |seed| {
            let mut selector =
                VoiceSelector::seeded(SelectionPolicy::Random, &catalog, &all_backends(), seed)
                    .unwrap();
            (0..20)
                .map(|_| selector.select("Jane", Gender::Female).unwrap().name.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(3), draw(3));
    }

    #[test]
    fn test_summary_counts_restricted_voices() {
        let catalog = catalog(0.5, 0.5);
        let selector =
            VoiceSelector::seeded(SelectionPolicy::Random, &catalog, &all_backends(), 0).unwrap();
        let summary = selector.summary();
        assert_eq!(summary[&Gender::Female].total, 22);
        assert_eq!(summary[&Gender::Female].per_backend[&BackendKind::Google], 20);
        assert_eq!(summary[&Gender::Female].per_backend[&BackendKind::ElevenLabs], 2);
        assert_eq!(summary[&Gender::Male].total, 2);

        let only_google = BTreeSet::from([BackendKind::Google]);
        let selector =
            VoiceSelector::seeded(SelectionPolicy::Random, &catalog, &only_google, 0).unwrap();
        let summary = selector.summary();
        assert_eq!(summary[&Gender::Female].total, 20);
        assert!(!summary[&Gender::Female].per_backend.contains_key(&BackendKind::ElevenLabs));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("fixed".parse(), Ok(SelectionPolicy::Fixed));
        assert_eq!("Random".parse(), Ok(SelectionPolicy::Random));
        assert_eq!("gender_based".parse(), Ok(SelectionPolicy::GenderBalanced));
        assert_eq!("gender-balanced".parse(), Ok(SelectionPolicy::GenderBalanced));
        assert!("round-robin".parse::<SelectionPolicy>().is_err());
    }
}
