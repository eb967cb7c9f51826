//! Markov-chain chatter.
//!
//! A variable-order (1..=3) prefix model trained on-line from chat. Training
//! happens on a dedicated worker thread fed by a bounded queue; splitting
//! and filtering run lock-free, only the word-table mutation takes the model
//! lock. Generation samples prefix lengths from a fixed weighted
//! distribution and walks frequency tables.

use crate::channel::Message;
use crate::codec::{tags, Persist, Reader, Writer};
use crate::config::MarkovConfig;
use crate::db::Store;
use crate::error::CodecResult;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info};
use unicode_general_category::{get_general_category, GeneralCategory};

/// Word-table index marking the start of a sentence.
pub const WORD_START: u64 = 0;
/// Word-table index marking the end of a sentence.
pub const WORD_END: u64 = 1;

pub const FLAG_EMOTE: u64 = 0x1;
pub const FLAG_SENTENCE_START: u64 = 0x2;
pub const FLAG_SENTENCE_END: u64 = 0x4;

/// Messages with fewer words than this never train.
const MIN_INPUT_LENGTH: usize = 2;
/// Messages shorter than this only train part of the time.
const GOOD_INPUT_LENGTH: usize = 6;
/// Discard probability for short-but-not-tiny messages.
const DISCARD_CHANCE: f64 = 0.80;
/// Longest prefix tracked; longer prefixes cost more to train and follow.
pub const MAX_PREFIX_LENGTH: usize = 3;
/// Weights for sampling a prefix length of 1, 2 or 3 during generation.
const PREFIX_LENGTH_WEIGHTS: [f64; MAX_PREFIX_LENGTH] = [0.55, 0.30, 0.15];
/// Hard cap on generated words.
const MAX_OUTPUT_LENGTH: usize = 50;

const QUEUE_CAPACITY: usize = 512;

// ============================================================================
// Model
// ============================================================================

/// An interned word: its text plus flag bits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredWord {
    pub text: String,
    pub flags: u64,
}

impl Persist for StoredWord {
    fn write_to(&self, w: &mut Writer) {
        w.tag(tags::MARKOV_STORED_WORD);
        w.write_str(&self.text);
        w.write(&self.flags);
    }

    fn read_from(r: &mut Reader<'_>) -> CodecResult<Self> {
        r.expect_tag(tags::MARKOV_STORED_WORD)?;
        Ok(Self {
            text: r.read_str()?,
            flags: r.read()?,
        })
    }
}

/// One (word, frequency) slot in a transition list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordFreq {
    pub index: u64,
    pub frequency: u64,
}

impl Persist for WordFreq {
    fn write_to(&self, w: &mut Writer) {
        w.tag(tags::MARKOV_WORD);
        w.write(&self.index);
        w.write(&self.frequency);
    }

    fn read_from(r: &mut Reader<'_>) -> CodecResult<Self> {
        r.expect_tag(tags::MARKOV_WORD)?;
        Ok(Self {
            index: r.read()?,
            frequency: r.read()?,
        })
    }
}

/// The successors of one prefix: total frequency, the frequency vector, and
/// a word-index → slot map for O(1) bumps.
#[derive(Debug, Clone, Default)]
pub struct WordList {
    pub total_frequency: u64,
    pub words: Vec<WordFreq>,
    slots: HashMap<u64, u64>,
}

impl WordList {
    fn observe(&mut self, word: u64) {
        self.total_frequency += 1;
        match self.slots.get(&word) {
            Some(&slot) => self.words[slot as usize].frequency += 1,
            None => {
                self.slots.insert(word, self.words.len() as u64);
                self.words.push(WordFreq {
                    index: word,
                    frequency: 1,
                });
            }
        }
    }

    pub fn frequency_of(&self, word: u64) -> u64 {
        self.slots
            .get(&word)
            .map(|&slot| self.words[slot as usize].frequency)
            .unwrap_or(0)
    }
}

impl Persist for WordList {
    fn write_to(&self, w: &mut Writer) {
        w.tag(tags::MARKOV_WORD_LIST);
        w.write(&self.total_frequency);
        w.write(&self.words);
        w.write(&self.slots);
    }

    fn read_from(r: &mut Reader<'_>) -> CodecResult<Self> {
        r.expect_tag(tags::MARKOV_WORD_LIST)?;
        Ok(Self {
            total_frequency: r.read()?,
            words: r.read()?,
            slots: r.read()?,
        })
    }
}

/// The whole model: interned words, the word → index map, and the
/// prefix-hash → successors table.
#[derive(Debug, Clone)]
pub struct MarkovModel {
    pub words: Vec<StoredWord>,
    index_of: HashMap<String, u64>,
    pub table: HashMap<u64, WordList>,
}

impl MarkovModel {
    pub fn new() -> Self {
        Self {
            // slots 0 and 1 are the sentence markers and never appear in
            // the word map
            words: vec![
                StoredWord {
                    text: String::new(),
                    flags: FLAG_SENTENCE_START,
                },
                StoredWord {
                    text: String::new(),
                    flags: FLAG_SENTENCE_END,
                },
            ],
            index_of: HashMap::new(),
            table: HashMap::new(),
        }
    }

    /// Intern a word. Emotes live in a disjoint namespace: their map key
    /// carries a leading-space sentinel no real word can have.
    pub fn word_index(&mut self, text: &str, emote: bool) -> u64 {
        let key = if emote {
            format!(" {text}")
        } else {
            text.to_string()
        };

        if let Some(&idx) = self.index_of.get(&key) {
            return idx;
        }

        let idx = self.words.len() as u64;
        self.words.push(StoredWord {
            text: text.to_string(),
            flags: if emote { FLAG_EMOTE } else { 0 },
        });
        self.index_of.insert(key, idx);
        idx
    }

    /// Look a word up without interning it.
    pub fn lookup(&self, text: &str) -> Option<u64> {
        self.index_of.get(text).copied()
    }

    /// Record one split message: bracket with the sentence markers, then
    /// count every (prefix, successor) pair for prefix lengths 1..=3.
    pub fn train(&mut self, words: &[SplitWord]) {
        let mut idxs = Vec::with_capacity(words.len() + 2);
        idxs.push(WORD_START);
        for w in words {
            idxs.push(self.word_index(&w.text, w.emote));
        }
        idxs.push(WORD_END);

        for i in 0..idxs.len() {
            for k in 1..=MAX_PREFIX_LENGTH {
                if i + k >= idxs.len() {
                    break;
                }

                let hash = prefix_hash(&idxs[i..i + k]);
                let target = idxs[i + k];
                self.table.entry(hash).or_default().observe(target);
            }
        }
    }
}

impl Default for MarkovModel {
    fn default() -> Self {
        Self::new()
    }
}

impl Persist for MarkovModel {
    fn write_to(&self, w: &mut Writer) {
        w.tag(tags::MARKOV_DB);
        w.write(&self.words);
        w.write(&self.index_of);
        w.write(&self.table);
    }

    fn read_from(r: &mut Reader<'_>) -> CodecResult<Self> {
        r.expect_tag(tags::MARKOV_DB)?;
        Ok(Self {
            words: r.read()?,
            index_of: r.read()?,
            table: r.read()?,
        })
    }
}

/// 64-bit FNV-1a over the little-endian bytes of a word-index sequence.
/// Stable across runs because the table is persisted.
pub fn prefix_hash(indices: &[u64]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for &idx in indices {
        for b in idx.to_le_bytes() {
            h ^= u64::from(b);
            h = h.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }
    h
}

// ============================================================================
// Splitting
// ============================================================================

/// A word produced by the splitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitWord {
    pub text: String,
    pub emote: bool,
}

impl SplitWord {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            emote: false,
        }
    }
}

fn is_sentence_punct(c: char) -> bool {
    matches!(c, '.' | ',' | '!' | '?')
}

// categories the trainer never wants to learn: unassigned, combining marks,
// separators, control/format noise, and the So emoji-symbol block
fn is_dropped_category(c: char) -> bool {
    matches!(
        get_general_category(c),
        GeneralCategory::Unassigned
            | GeneralCategory::NonspacingMark
            | GeneralCategory::SpacingMark
            | GeneralCategory::EnclosingMark
            | GeneralCategory::LineSeparator
            | GeneralCategory::ParagraphSeparator
            | GeneralCategory::Control
            | GeneralCategory::Format
            | GeneralCategory::Surrogate
            | GeneralCategory::PrivateUse
            | GeneralCategory::OtherSymbol
    )
}

/// Split a message into markov words. Whitespace separates; a run of
/// `.,!?` directly before whitespace or the end becomes its own word;
/// emote spans (byte ranges into `text`) come through whole.
pub fn split_message(text: &str, emotes: &[(usize, usize)]) -> Vec<SplitWord> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut iter = text.char_indices().peekable();

    let flush = |cur: &mut String, out: &mut Vec<SplitWord>| {
        if !cur.is_empty() {
            out.push(SplitWord::plain(std::mem::take(cur)));
        }
    };

    while let Some((i, c)) = iter.next() {
        if let Some(&(start, end)) = emotes.iter().find(|&&(s, _)| s == i) {
            flush(&mut cur, &mut out);
            if let Some(name) = text.get(start..end) {
                out.push(SplitWord {
                    text: name.to_string(),
                    emote: true,
                });
            }
            while iter.peek().is_some_and(|&(j, _)| j < end) {
                iter.next();
            }
            continue;
        }

        if c.is_whitespace() {
            flush(&mut cur, &mut out);
            continue;
        }

        if is_sentence_punct(c) {
            let mut punct = String::new();
            punct.push(c);
            while let Some(&(_, p)) = iter.peek() {
                if !is_sentence_punct(p) {
                    break;
                }
                punct.push(p);
                iter.next();
            }

            let at_break = match iter.peek() {
                None => true,
                Some(&(_, next)) => next.is_whitespace(),
            };

            if at_break {
                flush(&mut cur, &mut out);
                out.push(SplitWord::plain(punct));
            } else {
                cur.push_str(&punct);
            }
            continue;
        }

        if is_dropped_category(c) {
            continue;
        }

        cur.push(c);
    }

    flush(&mut cur, &mut out);
    out
}

// ============================================================================
// Generation
// ============================================================================

fn sample_prefix_len(rng: &mut impl Rng) -> usize {
    let x: f64 = rng.gen();
    let mut acc = 0.0;
    for (i, w) in PREFIX_LENGTH_WEIGHTS.iter().enumerate() {
        acc += w;
        if x < acc {
            return i + 1;
        }
    }
    MAX_PREFIX_LENGTH
}

fn generate_indices(model: &MarkovModel, rng: &mut impl Rng, seed: &[u64]) -> Vec<u64> {
    let mut out: Vec<u64> = if seed.is_empty() {
        vec![WORD_START]
    } else {
        seed.to_vec()
    };

    while out.len() < MAX_OUTPUT_LENGTH {
        let mut len = sample_prefix_len(rng).min(out.len());
        let mut next = WORD_END;

        // follow the longest available prefix, shortening on misses
        while len > 0 {
            let hash = prefix_hash(&out[out.len() - len..]);
            if let Some(wl) = model.table.get(&hash) {
                if wl.total_frequency > 0 {
                    let mut sel = rng.gen_range(0..wl.total_frequency);
                    for wf in &wl.words {
                        if wf.frequency > sel {
                            next = wf.index;
                            break;
                        }
                        sel -= wf.frequency;
                    }
                    break;
                }
            }
            len -= 1;
        }

        if next == WORD_END {
            break;
        }
        out.push(next);
    }

    out
}

fn assemble(model: &MarkovModel, cfg: &MarkovConfig, idxs: &[u64]) -> Message {
    let mut msg = Message::new();

    for &idx in idxs {
        if idx == WORD_START || idx == WORD_END {
            continue;
        }

        let Some(word) = model.words.get(idx as usize) else {
            continue;
        };

        if word.flags & FLAG_EMOTE != 0 {
            msg = msg.add_emote(word.text.clone());
            continue;
        }

        let mut text = word.text.as_str();
        if cfg.strip_pings {
            text = text.strip_prefix('@').unwrap_or(text);
        }
        if text.is_empty() {
            continue;
        }

        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(first), None) if is_sentence_punct(first) => {
                msg = msg.add_no_space(text);
            }
            _ => msg = msg.add(text),
        }
    }

    msg
}

/// Generate a message, optionally continuing from seed words. Too-short
/// results are retried up to the configured limit.
pub fn generate(model: &MarkovModel, cfg: &MarkovConfig, seed: &[String]) -> Message {
    let mut rng = rand::thread_rng();

    let seed_idxs: Vec<u64> = seed.iter().filter_map(|w| model.lookup(w)).collect();

    let mut best = Message::new();
    for _ in 0..=cfg.max_retries {
        let idxs = generate_indices(model, &mut rng, &seed_idxs);
        let msg = assemble(model, cfg, &idxs);
        if msg.fragments.len() >= cfg.min_length {
            return msg;
        }
        if msg.fragments.len() > best.fragments.len() {
            best = msg;
        }
    }

    best
}

// ============================================================================
// Worker
// ============================================================================

enum Job {
    Message {
        text: String,
        emotes: Vec<(usize, usize)>,
        retraining: bool,
    },
    Stop,
}

#[derive(Default)]
struct RetrainProgress {
    done: AtomicU64,
    total: AtomicU64,
}

/// Handle to the training worker thread.
pub struct MarkovWorker {
    tx: SyncSender<Job>,
    handle: Option<JoinHandle<()>>,
    progress: Arc<RetrainProgress>,
}

impl MarkovWorker {
    /// Spawn the worker over the store's model cell.
    pub fn spawn(store: Arc<Store>) -> MarkovWorker {
        let (tx, rx) = sync_channel(QUEUE_CAPACITY);
        let progress = Arc::new(RetrainProgress::default());
        let thread_progress = Arc::clone(&progress);

        let handle = std::thread::Builder::new()
            .name("markov".to_string())
            .spawn(move || worker_loop(store, rx, thread_progress))
            .expect("failed to spawn markov worker");

        MarkovWorker {
            tx,
            handle: Some(handle),
            progress,
        }
    }

    /// Queue a chat message for training. Blocks briefly when the queue is
    /// full; messages are processed in arrival order.
    pub fn feed(&self, text: &str, emotes: Vec<(usize, usize)>) {
        let _ = self.tx.send(Job::Message {
            text: text.to_string(),
            emotes,
            retraining: false,
        });
    }

    /// Clear the model and replay every non-command message from the log.
    pub fn retrain(&self, store: &Store) {
        store.markov_write(|m| *m = MarkovModel::new());

        let jobs: Vec<(String, Vec<(usize, usize)>)> = store.read(|db| {
            db.twitch
                .message_log
                .messages
                .iter()
                .filter(|m| !m.is_command)
                .filter_map(|m| {
                    let text = db.twitch.message_log.text_of(m)?;
                    let emotes = m
                        .emotes
                        .iter()
                        .map(|e| (e.start as usize, (e.start + e.len) as usize))
                        .collect();
                    Some((text.to_string(), emotes))
                })
                .collect()
        });

        self.progress.done.store(0, Ordering::SeqCst);
        self.progress.total.store(jobs.len() as u64, Ordering::SeqCst);
        info!(messages = jobs.len(), "markov retraining started");

        for (text, emotes) in jobs {
            let _ = self.tx.send(Job::Message {
                text,
                emotes,
                retraining: true,
            });
        }
    }

    /// (processed, total) counters for the current retraining run.
    pub fn retrain_progress(&self) -> (u64, u64) {
        (
            self.progress.done.load(Ordering::SeqCst),
            self.progress.total.load(Ordering::SeqCst),
        )
    }

    /// Push the stop sentinel and join the worker.
    pub fn shutdown(mut self) {
        let _ = self.tx.send(Job::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(store: Arc<Store>, rx: Receiver<Job>, progress: Arc<RetrainProgress>) {
    let mut rng = rand::thread_rng();

    loop {
        match rx.recv() {
            Err(_) | Ok(Job::Stop) => break,
            Ok(Job::Message {
                text,
                emotes,
                retraining,
            }) => {
                process_one(&store, &mut rng, &text, &emotes);
                if retraining {
                    progress.done.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }

    info!("markov worker exited");
}

fn process_one(store: &Store, rng: &mut impl Rng, text: &str, emotes: &[(usize, usize)]) {
    // splitting is lock-free; only the table update takes the model lock
    let words = split_message(text, emotes);

    if words.len() < MIN_INPUT_LENGTH {
        return;
    }
    if words.len() < GOOD_INPUT_LENGTH && rng.gen::<f64>() < DISCARD_CHANCE {
        debug!(words = words.len(), "discarded short markov input");
        return;
    }

    store.markov_write(|m| m.train(&words));
}
