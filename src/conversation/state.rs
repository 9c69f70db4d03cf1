//! Shared state of a character's conversation routines
//!
//! Every field has one writing role; the locks only make the individual
//! reads and writes atomic and are never held across an await.

use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, watch};

use crate::types::conversation::{AgentMessage, ConversationRecord, PlannedConversation};
use crate::types::identifiers::CharacterId;
use crate::types::profile::Profile;

/// Day-boundary bookkeeping behind the plan signal
#[derive(Default)]
struct PlanTrigger {
    last_day: Option<NaiveDate>,
    epoch: u64,
}

/// Conversation working memory of one character
pub struct ConversationState {
    character_id: CharacterId,
    profile: Mutex<Profile>,
    ongoing_tasks: Mutex<Vec<ConversationRecord>>,
    daily_tasks: Mutex<VecDeque<PlannedConversation>>,
    waiting_responses: Mutex<VecDeque<AgentMessage>>,
    contacted_today: Mutex<HashSet<CharacterId>>,
    plan_signal: AtomicBool,
    plan_notify: Notify,
    first_message_seen: AtomicBool,
    plan_trigger: Mutex<PlanTrigger>,
    game_clock: watch::Sender<Option<NaiveDateTime>>,
}

impl ConversationState {
    /// Empty state with a placeholder profile
    #[must_use]
    pub fn new(character_id: CharacterId) -> Self {
        let (game_clock, _) = watch::channel(None);
        Self {
            character_id,
            profile: Mutex::new(Profile::placeholder(character_id)),
            ongoing_tasks: Mutex::new(Vec::new()),
            daily_tasks: Mutex::new(VecDeque::new()),
            waiting_responses: Mutex::new(VecDeque::new()),
            contacted_today: Mutex::new(HashSet::new()),
            plan_signal: AtomicBool::new(false),
            plan_notify: Notify::new(),
            first_message_seen: AtomicBool::new(false),
            plan_trigger: Mutex::new(PlanTrigger::default()),
            game_clock,
        }
    }

    /// Owning character
    #[must_use]
    pub fn character_id(&self) -> CharacterId {
        self.character_id
    }

    // ------------------------------------------------------------------------
    // Profile (written by the daily planner)
    // ------------------------------------------------------------------------

    /// Profile snapshot
    #[must_use]
    pub fn profile(&self) -> Profile {
        self.profile.lock().clone()
    }

    pub(super) fn set_profile(&self, profile: Profile) {
        *self.profile.lock() = profile;
    }

    // ------------------------------------------------------------------------
    // Game clock and plan trigger (written by the classifier)
    // ------------------------------------------------------------------------

    /// Latest game time reported by the world
    #[must_use]
    pub fn game_time(&self) -> Option<NaiveDateTime> {
        *self.game_clock.borrow()
    }

    /// Whether a daily planning pass is pending
    #[must_use]
    pub fn plan_signal(&self) -> bool {
        self.plan_signal.load(Ordering::SeqCst)
    }

    /// Whether any game time was received yet
    #[must_use]
    pub fn first_message_seen(&self) -> bool {
        self.first_message_seen.load(Ordering::SeqCst)
    }

    /// Record a game time; returns `true` if it crossed into a new day
    ///
    /// The first game time always counts as a new day. The plan trigger is
    /// raised at most once per game date.
    pub(super) fn observe_game_time(&self, time: NaiveDateTime) -> bool {
        self.game_clock.send_replace(Some(time));
        self.first_message_seen.store(true, Ordering::SeqCst);

        let day = time.date();
        {
            let mut trigger = self.plan_trigger.lock();
            if trigger.last_day == Some(day) {
                return false;
            }
            trigger.last_day = Some(day);
            trigger.epoch += 1;
            self.plan_signal.store(true, Ordering::SeqCst);
        }
        self.plan_notify.notify_one();
        true
    }

    /// Wait until the plan trigger is raised; returns the trigger's epoch
    pub(super) async fn wait_plan_signal(&self) -> u64 {
        loop {
            let notified = self.plan_notify.notified();
            if self.plan_signal.load(Ordering::SeqCst) {
                return self.plan_trigger.lock().epoch;
            }
            notified.await;
        }
    }

    /// Lower the plan trigger unless a newer day raised it again meanwhile
    pub(super) fn clear_plan_signal(&self, epoch: u64) {
        let trigger = self.plan_trigger.lock();
        if trigger.epoch == epoch {
            self.plan_signal.store(false, Ordering::SeqCst);
        }
    }

    // ------------------------------------------------------------------------
    // Ongoing tasks (written by the classifier, drained by the reconciler)
    // ------------------------------------------------------------------------

    /// Transcripts pending reconciliation
    #[must_use]
    pub fn ongoing_tasks(&self) -> Vec<ConversationRecord> {
        self.ongoing_tasks.lock().clone()
    }

    /// Replace the entry with the same (pair, start time) key, or append
    pub(super) fn upsert_ongoing(&self, record: ConversationRecord) {
        let key = record.key();
        let mut tasks = self.ongoing_tasks.lock();
        match tasks.iter_mut().find(|r| r.key() == key) {
            Some(existing) => *existing = record,
            None => tasks.push(record),
        }
    }

    /// Fold a completed turn into its transcript
    ///
    /// The turn is appended to the matching entry, or starts a new one.
    pub(super) fn record_completed_turn(&self, message: AgentMessage) {
        let record = message.into_record();
        let key = record.key();
        let mut tasks = self.ongoing_tasks.lock();
        match tasks.iter_mut().find(|r| r.key() == key) {
            Some(existing) => existing.messages.extend(record.messages),
            None => tasks.push(record),
        }
    }

    pub(super) fn drain_ongoing(&self) -> Vec<ConversationRecord> {
        std::mem::take(&mut *self.ongoing_tasks.lock())
    }

    // ------------------------------------------------------------------------
    // Waiting responses (pushed by the classifier, popped by the reply worker)
    // ------------------------------------------------------------------------

    /// Turns awaiting a generated reply, oldest first
    #[must_use]
    pub fn waiting_responses(&self) -> Vec<AgentMessage> {
        self.waiting_responses.lock().iter().cloned().collect()
    }

    pub(super) fn push_waiting(&self, message: AgentMessage) {
        self.waiting_responses.lock().push_back(message);
    }

    pub(super) fn peek_waiting(&self) -> Option<AgentMessage> {
        self.waiting_responses.lock().front().cloned()
    }

    pub(super) fn pop_waiting(&self) -> Option<AgentMessage> {
        self.waiting_responses.lock().pop_front()
    }

    // ------------------------------------------------------------------------
    // Daily tasks (filled by the daily planner, popped by the starter loop)
    // ------------------------------------------------------------------------

    /// Planned conversation starts, in start order
    #[must_use]
    pub fn daily_tasks(&self) -> Vec<PlannedConversation> {
        self.daily_tasks.lock().iter().cloned().collect()
    }

    /// Replace the day's plan
    pub(super) fn replace_daily_tasks(&self, tasks: Vec<PlannedConversation>) {
        *self.daily_tasks.lock() = tasks.into();
        self.contacted_today.lock().clear();
    }

    pub(super) fn peek_daily(&self) -> Option<PlannedConversation> {
        self.daily_tasks.lock().front().cloned()
    }

    /// Relabel the head item, if it is still `item`
    pub(super) fn relabel_head(&self, item: &PlannedConversation, at: NaiveDateTime) {
        let mut tasks = self.daily_tasks.lock();
        if let Some(head) = tasks.front_mut()
            && head == item
        {
            head.scheduled_at = at;
        }
    }

    /// Pop the head item, if it is still `item`
    ///
    /// A replan may have replaced the queue while the item was in flight.
    pub(super) fn pop_daily_if(&self, item: &PlannedConversation) -> bool {
        let mut tasks = self.daily_tasks.lock();
        if tasks.front() == Some(item) {
            tasks.pop_front();
            true
        } else {
            false
        }
    }

    pub(super) fn mark_contacted(&self, partner: CharacterId) {
        self.contacted_today.lock().insert(partner);
    }

    pub(super) fn was_contacted(&self, partner: CharacterId) -> bool {
        self.contacted_today.lock().contains(&partner)
    }
}
