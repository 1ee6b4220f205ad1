//! Timer-driven posting loop: quota gate, themed generation with uniqueness
//! filtering, submission with one credential-reload retry, and best-effort
//! mirroring to registered chats.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::completion::{ChatCompletion, Message, SamplingParams};
use crate::persona::Persona;
use crate::posting::{PostingApi, PostingError};
use crate::registry::{ChatRegistry, Messenger};
use crate::uniqueness::UniquenessFilter;

/// Candidate-post source consumed by the scheduler.
pub trait ComposePost {
    async fn compose(&self, theme: &str) -> Result<String, crate::completion::Error>;
}

/// Composes candidate posts from the completion endpoint with the persona
/// preamble and post prompt.
pub struct PostComposer<C> {
    persona: Arc<Persona>,
    completion: C,
}

impl<C> PostComposer<C> {
    pub fn new(persona: Arc<Persona>, completion: C) -> Self {
        Self { persona, completion }
    }
}

impl<C: ChatCompletion> ComposePost for PostComposer<C> {
    async fn compose(&self, theme: &str) -> Result<String, crate::completion::Error> {
        let messages = [Message::user(self.persona.post_prompt(theme))];
        let raw = self
            .completion
            .complete(&self.persona.system_prompt, &messages, SamplingParams::new(100, 0.85))
            .await?;
        Ok(self.persona.post_process(&raw))
    }
}

/// Theme labels handed out round-robin without replacement; the deck is
/// reshuffled once exhausted.
pub struct ThemeRotation {
    all: Vec<String>,
    remaining: Vec<String>,
}

impl ThemeRotation {
    pub fn new(themes: Vec<String>) -> Self {
        Self { all: themes, remaining: Vec::new() }
    }

    pub fn next(&mut self) -> String {
        if self.all.is_empty() {
            return String::new();
        }
        if self.remaining.is_empty() {
            self.remaining = self.all.clone();
            self.remaining.shuffle(&mut rand::thread_rng());
        }
        self.remaining.pop().unwrap_or_default()
    }
}

/// Posts made in the current day, reset once 24 hours elapse.
pub struct DailyQuota {
    limit: u32,
    count: u32,
    last_reset: DateTime<Utc>,
}

impl DailyQuota {
    pub fn new(limit: u32, now: DateTime<Utc>) -> Self {
        Self { limit, count: 0, last_reset: now }
    }

    /// Reset the counter when a full day has elapsed. Returns true on reset.
    pub fn roll_over(&mut self, now: DateTime<Utc>) -> bool {
        if now - self.last_reset >= chrono::Duration::hours(24) {
            self.count = 0;
            self.last_reset = now;
            return true;
        }
        false
    }

    pub fn is_exhausted(&self) -> bool {
        self.count >= self.limit
    }

    pub fn record_post(&mut self) {
        debug_assert!(self.count < self.limit);
        self.count = (self.count + 1).min(self.limit);
    }

    pub fn posted_today(&self) -> u32 {
        self.count
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub initial_delay: Duration,
    /// Generation attempts per cycle before giving up.
    pub max_attempts: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1080),
            initial_delay: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

/// Outcome of one scheduling cycle.
#[derive(Debug, PartialEq)]
pub enum CycleOutcome {
    Posted { post_id: String },
    /// Daily limit reached; cycle skipped.
    QuotaExhausted,
    /// Every generation attempt was rejected or failed.
    NoCandidate,
    /// Submission failed after any credential-reload retry.
    PostFailed,
}

pub struct Scheduler<G, P, M> {
    composer: G,
    posting: P,
    messenger: M,
    registry: Arc<Mutex<ChatRegistry>>,
    persona: Arc<Persona>,
    filter: UniquenessFilter,
    quota: DailyQuota,
    themes: ThemeRotation,
    last_post: Option<String>,
    settings: SchedulerSettings,
}

impl<G, P, M> Scheduler<G, P, M>
where
    G: ComposePost,
    P: PostingApi,
    M: Messenger,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        composer: G,
        posting: P,
        messenger: M,
        registry: Arc<Mutex<ChatRegistry>>,
        persona: Arc<Persona>,
        filter: UniquenessFilter,
        quota: DailyQuota,
        settings: SchedulerSettings,
    ) -> Self {
        let themes = ThemeRotation::new(persona.themes.clone());
        Self {
            composer,
            posting,
            messenger,
            registry,
            persona,
            filter,
            quota,
            themes,
            last_post: None,
            settings,
        }
    }

    /// Drive the posting loop forever. Failures never escape a cycle.
    pub async fn run(mut self) {
        info!(
            "Posting scheduler started: every {:?}, limit {}/day",
            self.settings.interval,
            self.quota.limit()
        );
        sleep(self.settings.initial_delay).await;
        loop {
            match self.tick(Utc::now()).await {
                CycleOutcome::Posted { post_id } => {
                    info!(
                        "Cycle posted {post_id} ({}/{} today)",
                        self.quota.posted_today(),
                        self.quota.limit()
                    );
                }
                CycleOutcome::QuotaExhausted => debug!("Cycle skipped: quota exhausted"),
                CycleOutcome::NoCandidate => warn!("Cycle skipped: no acceptable candidate"),
                CycleOutcome::PostFailed => error!("Cycle failed: post not submitted"),
            }
            sleep(self.settings.interval).await;
        }
    }

    /// Run one scheduling cycle against the supplied clock.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> CycleOutcome {
        if self.quota.roll_over(now) {
            info!("Daily post counter reset");
        }
        if self.quota.is_exhausted() {
            info!("Daily post limit reached ({}), waiting for reset", self.quota.limit());
            return CycleOutcome::QuotaExhausted;
        }

        let Some(text) = self.next_candidate().await else {
            return CycleOutcome::NoCandidate;
        };

        match self.publish(&text).await {
            Ok(post_id) => {
                self.quota.record_post();
                self.filter.record(&text);
                self.last_post = Some(text.clone());
                self.mirror(&text, &post_id).await;
                CycleOutcome::Posted { post_id }
            }
            Err(e) => {
                error!("Failed to submit post: {e}");
                CycleOutcome::PostFailed
            }
        }
    }

    /// Generate candidates until one clears the uniqueness filter, up to the
    /// attempt ceiling. The just-posted text is treated as a rejection too.
    async fn next_candidate(&mut self) -> Option<String> {
        for attempt in 1..=self.settings.max_attempts {
            let theme = self.themes.next();
            match self.composer.compose(&theme).await {
                Ok(candidate) => {
                    if self.last_post.as_deref() == Some(candidate.as_str()) {
                        warn!("Attempt {attempt}: candidate repeats the last post, regenerating");
                        continue;
                    }
                    match self.filter.check(&candidate) {
                        Ok(()) => return Some(candidate),
                        Err(rejection) => {
                            debug!("Attempt {attempt} (theme {theme}): {rejection}");
                        }
                    }
                }
                Err(e) => warn!("Attempt {attempt}: generation failed: {e}"),
            }
        }
        warn!("No acceptable candidate in {} attempts", self.settings.max_attempts);
        None
    }

    /// Submit, retrying once after a credential reload on auth failure.
    async fn publish(&mut self, text: &str) -> Result<String, PostingError> {
        match self.posting.submit(text).await {
            Err(e) if e.is_auth() => {
                warn!("Authorization failed, reloading credentials: {e}");
                if self.posting.reload_credentials() {
                    self.posting.submit(text).await
                } else {
                    Err(e)
                }
            }
            other => other,
        }
    }

    /// Best-effort notification to every registered chat.
    async fn mirror(&self, text: &str, post_id: &str) {
        let notice = self.persona.mirror_notice(text, post_id);
        let mut registry = self.registry.lock().await;
        if registry.is_empty() {
            debug!("No registered chats to notify");
            return;
        }
        let report = registry.broadcast(&self.messenger, &notice).await;
        info!(
            "Mirrored post to {}/{} chats ({} pruned)",
            report.delivered,
            report.attempted,
            report.pruned.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SendFailure;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    struct ScriptedComposer {
        replies: StdMutex<VecDeque<Result<String, crate::completion::Error>>>,
        calls: StdMutex<u32>,
    }

    impl ScriptedComposer {
        fn new(replies: Vec<Result<String, crate::completion::Error>>) -> Self {
            Self {
                replies: StdMutex::new(replies.into()),
                calls: StdMutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl ComposePost for ScriptedComposer {
        async fn compose(&self, _theme: &str) -> Result<String, crate::completion::Error> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(crate::completion::Error::Empty))
        }
    }

    struct ScriptedPosting {
        results: StdMutex<VecDeque<Result<String, PostingError>>>,
        submissions: StdMutex<Vec<String>>,
        reload_succeeds: bool,
        reloads: StdMutex<u32>,
    }

    impl ScriptedPosting {
        fn ok() -> Self {
            Self::with_results(vec![])
        }

        fn with_results(results: Vec<Result<String, PostingError>>) -> Self {
            Self {
                results: StdMutex::new(results.into()),
                submissions: StdMutex::new(Vec::new()),
                reload_succeeds: true,
                reloads: StdMutex::new(0),
            }
        }

        fn reload_fails(mut self) -> Self {
            self.reload_succeeds = false;
            self
        }

        fn submission_count(&self) -> usize {
            self.submissions.lock().unwrap().len()
        }
    }

    impl PostingApi for ScriptedPosting {
        async fn submit(&self, text: &str) -> Result<String, PostingError> {
            let n = {
                let mut submissions = self.submissions.lock().unwrap();
                submissions.push(text.to_string());
                submissions.len()
            };
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(format!("post-{n}")))
        }

        fn reload_credentials(&mut self) -> bool {
            *self.reloads.lock().unwrap() += 1;
            self.reload_succeeds
        }
    }

    struct NullMessenger;

    impl Messenger for NullMessenger {
        async fn send(&self, _chat_id: i64, _text: &str) -> Result<(), SendFailure> {
            Ok(())
        }
    }

    fn auth_err() -> PostingError {
        PostingError::Auth { status: 403, body: "forbidden".into() }
    }

    fn scheduler(
        composer: ScriptedComposer,
        posting: ScriptedPosting,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Scheduler<ScriptedComposer, ScriptedPosting, NullMessenger> {
        Scheduler::new(
            composer,
            posting,
            NullMessenger,
            Arc::new(Mutex::new(ChatRegistry::new())),
            Arc::new(Persona::orca()),
            UniquenessFilter::new(150, 0.3, Vec::new()),
            DailyQuota::new(limit, now),
            SchedulerSettings::default(),
        )
    }

    fn candidates(texts: &[&str]) -> ScriptedComposer {
        ScriptedComposer::new(texts.iter().map(|t| Ok(t.to_string())).collect())
    }

    #[tokio::test]
    async fn test_successful_cycle_posts_and_counts() {
        let now = Utc::now();
        let mut s = scheduler(candidates(&["orcas dream in sonar"]), ScriptedPosting::ok(), 10, now);

        let outcome = s.tick(now).await;
        assert_eq!(outcome, CycleOutcome::Posted { post_id: "post-1".into() });
        assert_eq!(s.quota.posted_today(), 1);
        assert_eq!(s.last_post.as_deref(), Some("orcas dream in sonar"));
        assert_eq!(s.filter.len(), 1);
    }

    #[tokio::test]
    async fn test_quota_blocks_third_post_before_reset() {
        let now = Utc::now();
        let composer = candidates(&[
            "tide pools teem with tiny hunters",
            "kelp forests are underwater cathedrals",
            "squid write in chromatophore ink",
        ]);
        let posting = ScriptedPosting::ok();
        let mut s = scheduler(composer, posting, 2, now);

        assert!(matches!(s.tick(now).await, CycleOutcome::Posted { .. }));
        assert!(matches!(s.tick(now).await, CycleOutcome::Posted { .. }));
        assert_eq!(s.tick(now).await, CycleOutcome::QuotaExhausted);
        // No posting-API call happened on the blocked cycle.
        assert_eq!(s.posting.submission_count(), 2);
        assert_eq!(s.composer.calls(), 2);
    }

    #[tokio::test]
    async fn test_quota_resets_after_24_hours() {
        let now = Utc::now();
        let composer = candidates(&[
            "barnacles are stubborn tenants",
            "plankton throws the ocean's biggest party",
        ]);
        let mut s = scheduler(composer, ScriptedPosting::ok(), 1, now);

        assert!(matches!(s.tick(now).await, CycleOutcome::Posted { .. }));
        assert_eq!(s.tick(now).await, CycleOutcome::QuotaExhausted);

        let later = now + chrono::Duration::hours(25);
        assert!(matches!(s.tick(later).await, CycleOutcome::Posted { .. }));
        assert_eq!(s.quota.posted_today(), 1);
    }

    #[tokio::test]
    async fn test_rejected_candidates_consume_attempts_then_skip() {
        let now = Utc::now();
        // All five candidates are near-identical; the first fills history via
        // a successful post, the rest are rejected.
        let composer = candidates(&[
            "the tide turns at midnight tonight",
            "the tide turns at midnight again",
            "the tide turns at midnight once more",
            "the tide turns at midnight as always",
            "the tide turns at midnight forever",
            "the tide turns at midnight still",
        ]);
        let posting = ScriptedPosting::ok();
        let mut s = scheduler(composer, posting, 10, now);

        assert!(matches!(s.tick(now).await, CycleOutcome::Posted { .. }));
        assert_eq!(s.tick(now).await, CycleOutcome::NoCandidate);
        // Attempt ceiling respected: 1 + max_attempts compositions total.
        assert_eq!(s.composer.calls(), 1 + SchedulerSettings::default().max_attempts);
        assert_eq!(s.posting.submission_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_of_last_post_is_regenerated() {
        let now = Utc::now();
        let composer = candidates(&[
            "salmon run upstream against all odds",
            // Exact repeat of the accepted post, then something new.
            "salmon run upstream against all odds",
            "albatrosses glide for days without flapping",
        ]);
        let mut s = scheduler(composer, ScriptedPosting::ok(), 10, now);

        assert!(matches!(s.tick(now).await, CycleOutcome::Posted { .. }));
        let outcome = s.tick(now).await;
        assert!(matches!(outcome, CycleOutcome::Posted { .. }));
        assert_eq!(
            s.last_post.as_deref(),
            Some("albatrosses glide for days without flapping")
        );
    }

    #[tokio::test]
    async fn test_generation_errors_skip_cycle_without_posting() {
        let now = Utc::now();
        let composer = ScriptedComposer::new(vec![]);
        let posting = ScriptedPosting::ok();
        let mut s = scheduler(composer, posting, 10, now);

        assert_eq!(s.tick(now).await, CycleOutcome::NoCandidate);
        assert_eq!(s.posting.submission_count(), 0);
        assert_eq!(s.quota.posted_today(), 0);
    }

    #[tokio::test]
    async fn test_auth_failure_reloads_and_retries_once() {
        let now = Utc::now();
        let composer = candidates(&["anemones host the shyest fish"]);
        let posting = ScriptedPosting::with_results(vec![
            Err(auth_err()),
            Ok("post-after-reload".into()),
        ]);
        let mut s = scheduler(composer, posting, 10, now);

        let outcome = s.tick(now).await;
        assert_eq!(outcome, CycleOutcome::Posted { post_id: "post-after-reload".into() });
        assert_eq!(s.posting.submission_count(), 2);
        assert_eq!(*s.posting.reloads.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_with_failed_reload_fails_cycle() {
        let now = Utc::now();
        let composer = candidates(&["coral spawns under the full moon"]);
        let posting = ScriptedPosting::with_results(vec![Err(auth_err())]).reload_fails();
        let mut s = scheduler(composer, posting, 10, now);

        assert_eq!(s.tick(now).await, CycleOutcome::PostFailed);
        assert_eq!(s.posting.submission_count(), 1);
        assert_eq!(s.quota.posted_today(), 0);
        assert_eq!(s.filter.len(), 0);
    }

    #[tokio::test]
    async fn test_persistent_auth_failure_fails_cycle_after_single_retry() {
        let now = Utc::now();
        let composer = candidates(&["moray eels have a second set of jaws"]);
        let posting = ScriptedPosting::with_results(vec![Err(auth_err()), Err(auth_err())]);
        let mut s = scheduler(composer, posting, 10, now);

        assert_eq!(s.tick(now).await, CycleOutcome::PostFailed);
        assert_eq!(s.posting.submission_count(), 2);
    }

    #[tokio::test]
    async fn test_successful_post_mirrors_to_registry() {
        struct CountingMessenger(StdMutex<Vec<i64>>);
        impl Messenger for CountingMessenger {
            async fn send(&self, chat_id: i64, _text: &str) -> Result<(), SendFailure> {
                self.0.lock().unwrap().push(chat_id);
                Ok(())
            }
        }

        let now = Utc::now();
        let registry = Arc::new(Mutex::new(ChatRegistry::new()));
        {
            let mut r = registry.lock().await;
            r.add(-100);
            r.add(-200);
        }

        let mut s = Scheduler::new(
            candidates(&["narwhal tusks are sensory organs"]),
            ScriptedPosting::ok(),
            CountingMessenger(StdMutex::new(Vec::new())),
            registry.clone(),
            Arc::new(Persona::orca()),
            UniquenessFilter::new(150, 0.3, Vec::new()),
            DailyQuota::new(10, now),
            SchedulerSettings::default(),
        );

        assert!(matches!(s.tick(now).await, CycleOutcome::Posted { .. }));
        let sent = s.messenger.0.lock().unwrap();
        assert_eq!(sent.len(), 2);
    }

    #[test]
    fn test_theme_rotation_cycles_without_replacement() {
        let mut rotation = ThemeRotation::new(vec!["A".into(), "B".into(), "C".into()]);
        let mut first_pass: Vec<String> = (0..3).map(|_| rotation.next()).collect();
        first_pass.sort();
        assert_eq!(first_pass, ["A", "B", "C"]);

        // Deck reshuffles and deals all three again.
        let mut second_pass: Vec<String> = (0..3).map(|_| rotation.next()).collect();
        second_pass.sort();
        assert_eq!(second_pass, ["A", "B", "C"]);
    }

    #[test]
    fn test_quota_counter_invariants() {
        let now = Utc::now();
        let mut quota = DailyQuota::new(2, now);
        assert!(!quota.is_exhausted());
        quota.record_post();
        quota.record_post();
        assert!(quota.is_exhausted());
        assert_eq!(quota.posted_today(), 2);

        // Not yet 24h: no reset.
        assert!(!quota.roll_over(now + chrono::Duration::hours(23)));
        assert!(quota.is_exhausted());

        // Exactly 24h: reset once.
        assert!(quota.roll_over(now + chrono::Duration::hours(24)));
        assert_eq!(quota.posted_today(), 0);
    }
}
