//! Context assembly pipeline.
//!
//! Builds the prompt for one model turn from four tiers of project
//! knowledge, filled greedily in priority order under a hard token budget:
//!
//! | Tier | Source | Trim strategy |
//! |------|--------|---------------|
//! | 1. Included files | Pinned by the user | Earliest-pinned truncated, then dropped |
//! | 2. History | Recent turns | Oldest dropped; tool batches kept whole |
//! | 3. Retrieved code | Index query | Chunks that do not fit are skipped |
//! | 4. File summaries | Files behind tier-3 chunks | Summaries that do not fit are skipped |
//!
//! The tools prompt, the current user message and the newest round of its
//! tool exchange are always included. If those alone exceed the budget,
//! assembly fails.
//!
//! # Determinism
//!
//! `assemble` is pure: identical inputs produce identical prompts. All I/O
//! (file reads, retrieval, summary lookups) happens beforehand in
//! [`ContextSources`](super::sources::ContextSources).

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use llmcode_core::{ChatMessage, ContextBudget, ConversationTurn, FileSummary, Role};
use llmcode_memory::ScoredChunk;
use serde::{Deserialize, Serialize};

use crate::context::token::{self, MESSAGE_OVERHEAD};

// ── Types ─────────────────────────────────────────────────────────────────

/// A file the user pinned with `/add`, with its current content.
#[derive(Debug, Clone, PartialEq)]
pub struct PinnedFile {
    pub path: String,
    pub content: String,
}

/// Everything gathered from disk and the stores for one assembly.
#[derive(Debug, Clone, Default)]
pub struct ContextSnapshot {
    /// Pinned files in inclusion order.
    pub pinned: Vec<PinnedFile>,
    /// Retrieval results in rank order.
    pub retrieved: Vec<ScoredChunk>,
    /// Fresh summaries for retrieved paths.
    pub summaries: Vec<FileSummary>,
}

/// All inputs required by the assembler for a single model turn.
pub struct AssemblyInput<'a> {
    /// Tool instructions, always first in the system message.
    pub tools_prompt: &'a str,
    /// Session history. The last user turn is the current message.
    pub history: &'a [ConversationTurn],
    pub snapshot: &'a ContextSnapshot,
}

/// The assembled prompt, ready for a completion request.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    /// System message first, then history around the current user message.
    pub messages: Vec<ChatMessage>,
    pub metadata: AssemblyMetadata,
}

/// Detailed metadata about the assembly process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyMetadata {
    /// Estimated tokens of the final message list.
    pub total_tokens: usize,
    /// Prompt budget (context length minus the response reservation).
    pub budget: usize,
    /// Budget utilization percentage (0.0–100.0).
    pub utilization_pct: f32,
    pub per_layer: Vec<LayerStats>,
    pub drops: Vec<DropInfo>,
}

impl AssemblyMetadata {
    pub fn layer(&self, name: &str) -> Option<&LayerStats> {
        self.per_layer.iter().find(|l| l.name == name)
    }

    pub fn drop_for(&self, layer: &str) -> Option<&DropInfo> {
        self.drops.iter().find(|d| d.layer == layer)
    }
}

/// Statistics for a single context layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerStats {
    pub name: String,
    /// Tokens consumed by this layer.
    pub tokens: usize,
    /// Items included after budget trimming.
    pub items_included: usize,
    /// Total items available before trimming.
    pub items_total: usize,
}

/// Items dropped from a layer during budget enforcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropInfo {
    pub layer: String,
    pub items_dropped: usize,
    /// Estimated tokens of dropped content.
    pub tokens_dropped: usize,
    pub reason: String,
}

/// Errors from context assembly.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssemblyError {
    /// Tools prompt + current user message + latest tool round alone
    /// exceed the budget.
    #[error(
        "Tools prompt ({system_tokens} tokens) + user message ({user_tokens} tokens) + latest tool results ({pending_tokens} tokens) exceed budget ({budget} tokens)"
    )]
    BudgetExceeded {
        system_tokens: usize,
        user_tokens: usize,
        pending_tokens: usize,
        budget: usize,
    },

    #[error("History has no user message to answer")]
    NoUserMessage,
}

pub const LAYER_SYSTEM: &str = "system";
pub const LAYER_FILES: &str = "included_files";
pub const LAYER_HISTORY: &str = "history";
pub const LAYER_RETRIEVED: &str = "retrieved_code";
pub const LAYER_SUMMARIES: &str = "file_summaries";
pub const LAYER_USER: &str = "user_message";

// ── Assembler ─────────────────────────────────────────────────────────────

/// The context assembler. Stateless; create one and reuse it.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    budget: ContextBudget,
    history_turns: usize,
    max_summary_chars: usize,
}

impl ContextAssembler {
    pub fn new(budget: ContextBudget) -> Self {
        Self {
            budget,
            history_turns: 20,
            max_summary_chars: 1200,
        }
    }

    /// How many turns of earlier conversation tier 2 may carry. The tool
    /// exchange of the current message is not counted.
    pub fn with_history_turns(mut self, turns: usize) -> Self {
        self.history_turns = turns;
        self
    }

    pub fn with_max_summary_chars(mut self, chars: usize) -> Self {
        self.max_summary_chars = chars;
        self
    }

    pub fn budget(&self) -> &ContextBudget {
        &self.budget
    }

    /// Assemble the prompt for the current user message.
    ///
    /// # Algorithm
    ///
    /// 1. Reserve the tools prompt, the current user message and the newest
    ///    round of its tool exchange; fail if they exceed the budget
    /// 2. Fill the remainder tier by tier: included files, history,
    ///    retrieved code, file summaries
    /// 3. Render one system message plus the history messages
    pub fn assemble(&self, input: &AssemblyInput<'_>) -> Result<AssembledPrompt, AssemblyError> {
        let budget = self.budget.available();
        let mut stats: Vec<LayerStats> = Vec::new();
        let mut drops: Vec<DropInfo> = Vec::new();

        let current_idx = input
            .history
            .iter()
            .rposition(|t| t.role == Role::User)
            .ok_or(AssemblyError::NoUserMessage)?;
        let user_message = ChatMessage::user(&input.history[current_idx].content);

        // ── Reserved: tools prompt + current message + latest tool round ───
        let system_tokens = MESSAGE_OVERHEAD + token::estimate_tokens(input.tools_prompt);
        let user_tokens = token::estimate_message_tokens(&user_message);
        let names = tool_names(input.history);
        let pending_tokens = units(&input.history[current_idx + 1..], current_idx + 1)
            .last()
            .map(|r| token::estimate_messages_tokens(&render_unit(&input.history[r.clone()], &names)))
            .unwrap_or(0);
        if system_tokens + user_tokens + pending_tokens > budget {
            return Err(AssemblyError::BudgetExceeded {
                system_tokens,
                user_tokens,
                pending_tokens,
                budget,
            });
        }
        let mut remaining = budget - system_tokens - user_tokens - pending_tokens;
        stats.push(LayerStats {
            name: LAYER_SYSTEM.into(),
            tokens: system_tokens,
            items_included: 1,
            items_total: 1,
        });

        let snapshot = input.snapshot;
        let mut sections: Vec<String> = Vec::new();

        // ── Tier 1: included files ─────────────────────────────────────────
        let files = fit_pinned(&snapshot.pinned, remaining);
        remaining -= files.tokens;
        files.record(
            LAYER_FILES,
            "Earliest-pinned files truncated or dropped",
            &mut stats,
            &mut drops,
        );
        let kept_pinned: HashSet<&str> = files
            .included
            .iter()
            .map(|&i| snapshot.pinned[i].path.as_str())
            .collect();
        let all_pinned: HashSet<&str> = snapshot.pinned.iter().map(|f| f.path.as_str()).collect();
        if !files.text.is_empty() {
            sections.push(files.text);
        }

        // ── Tier 2: conversation history ───────────────────────────────────
        // The newest tool round is selected first and always fits in the
        // reservation made above.
        let history = select_history(
            input.history,
            current_idx,
            self.history_turns,
            remaining + pending_tokens,
        );
        remaining = remaining + pending_tokens - history.tokens;
        stats.push(LayerStats {
            name: LAYER_HISTORY.into(),
            tokens: history.tokens,
            items_included: history.turns_included,
            items_total: input.history.len() - 1,
        });
        if let Some(d) = history.drop {
            drops.push(d);
        }

        // ── Tier 3: retrieved code ─────────────────────────────────────────
        let candidates: Vec<&ScoredChunk> = snapshot
            .retrieved
            .iter()
            .filter(|c| !kept_pinned.contains(c.chunk.path.as_str()))
            .collect();
        let chunk_entries: Vec<String> = candidates
            .iter()
            .map(|c| {
                format!(
                    "### {} (bytes {}-{}, score {:.2})\n```\n{}\n```\n",
                    c.chunk.path,
                    c.chunk.byte_range.start,
                    c.chunk.byte_range.end,
                    c.score,
                    c.chunk.content
                )
            })
            .collect();
        let retrieved = Section::greedy("## Retrieved Code", &chunk_entries, remaining);
        remaining -= retrieved.tokens;
        let mut referenced: Vec<&str> = Vec::new();
        for &i in &retrieved.included {
            let path = candidates[i].chunk.path.as_str();
            if !referenced.contains(&path) {
                referenced.push(path);
            }
        }
        retrieved.record(
            LAYER_RETRIEVED,
            "Lowest-ranked chunks dropped",
            &mut stats,
            &mut drops,
        );
        if !retrieved.text.is_empty() {
            sections.push(retrieved.text);
        }

        // ── Tier 4: summaries of files behind retrieved chunks ─────────────
        let by_path: HashMap<&str, &FileSummary> = snapshot
            .summaries
            .iter()
            .map(|s| (s.path.as_str(), s))
            .collect();
        let summary_entries: Vec<String> = referenced
            .iter()
            .filter(|p| !all_pinned.contains(*p))
            .filter_map(|p| by_path.get(p))
            .map(|s| format!("- {}: {}\n", s.path, clip(s.text.trim(), self.max_summary_chars)))
            .collect();
        let summaries = Section::greedy("## File Summaries", &summary_entries, remaining);
        summaries.record(
            LAYER_SUMMARIES,
            "Summaries dropped for budget",
            &mut stats,
            &mut drops,
        );
        if !summaries.text.is_empty() {
            sections.push(summaries.text);
        }

        // ── Render ─────────────────────────────────────────────────────────
        let system_text = if sections.is_empty() {
            input.tools_prompt.to_string()
        } else {
            format!("{}\n\n{}", input.tools_prompt, sections.join("\n\n"))
        };

        let mut messages = Vec::with_capacity(history.before.len() + history.after.len() + 2);
        messages.push(ChatMessage::system(system_text));
        messages.extend(history.before);
        messages.push(user_message);
        messages.extend(history.after);

        stats.push(LayerStats {
            name: LAYER_USER.into(),
            tokens: user_tokens,
            items_included: 1,
            items_total: 1,
        });

        let total_tokens = token::estimate_messages_tokens(&messages);
        debug_assert!(total_tokens <= budget);
        let utilization_pct = if budget == 0 {
            0.0
        } else {
            (total_tokens as f32 / budget as f32) * 100.0
        };

        Ok(AssembledPrompt {
            messages,
            metadata: AssemblyMetadata {
                total_tokens,
                budget,
                utilization_pct,
                per_layer: stats,
                drops,
            },
        })
    }
}

// ── Sections ──────────────────────────────────────────────────────────────

/// One rendered system-message section and what it cost.
struct Section {
    text: String,
    tokens: usize,
    /// Indices of included entries
    included: Vec<usize>,
    total: usize,
    dropped_tokens: usize,
}

impl Section {
    fn header_tokens(header: &str) -> usize {
        // Sections are joined with a blank line.
        token::estimate_tokens(&format!("\n\n{header}\n"))
    }

    fn build(header: &str, entries: &[String], included: Vec<usize>, tokens: usize) -> Self {
        let all: usize = entries.iter().map(|e| token::estimate_tokens(e)).sum();
        let included_entry_tokens: usize = included
            .iter()
            .map(|&i| token::estimate_tokens(&entries[i]))
            .sum();
        let text = if included.is_empty() {
            String::new()
        } else {
            let mut text = format!("{header}\n");
            for &i in &included {
                text.push_str(&entries[i]);
            }
            text
        };
        Self {
            text,
            tokens,
            total: entries.len(),
            dropped_tokens: all - included_entry_tokens,
            included,
        }
    }

    /// Take entries in order, skipping any that do not fit.
    fn greedy(header: &str, entries: &[String], budget: usize) -> Self {
        let header_tokens = Self::header_tokens(header);
        let mut used = 0;
        let mut included = Vec::new();
        for (i, entry) in entries.iter().enumerate() {
            let cost = token::estimate_tokens(entry) + if included.is_empty() { header_tokens } else { 0 };
            if used + cost <= budget {
                used += cost;
                included.push(i);
            }
        }
        Self::build(header, entries, included, used)
    }

    fn record(&self, layer: &str, reason: &str, stats: &mut Vec<LayerStats>, drops: &mut Vec<DropInfo>) {
        stats.push(LayerStats {
            name: layer.into(),
            tokens: self.tokens,
            items_included: self.included.len(),
            items_total: self.total,
        });
        let dropped = self.total - self.included.len();
        if dropped > 0 || self.dropped_tokens > 0 {
            drops.push(DropInfo {
                layer: layer.into(),
                items_dropped: dropped,
                tokens_dropped: self.dropped_tokens,
                reason: reason.into(),
            });
        }
    }
}

// ── Included files ────────────────────────────────────────────────────────

const FILES_HEADER: &str = "## Included Files";
const TRUNCATED_MARKER: &str = "\n[... truncated to fit the context budget ...]";

fn render_pinned(path: &str, content: &str) -> String {
    format!("### {path}\n```\n{content}\n```\n")
}

/// Fit pinned files into `budget`. While over budget, the earliest-pinned
/// remaining file is cut down to what still fits, or dropped when not even
/// a marker would fit.
fn fit_pinned(files: &[PinnedFile], budget: usize) -> Section {
    let original: Vec<String> = files.iter().map(|f| render_pinned(&f.path, &f.content)).collect();
    let mut entries: Vec<Option<String>> = original.iter().cloned().map(Some).collect();
    let header_tokens = Section::header_tokens(FILES_HEADER);
    let mut used: usize = original.iter().map(|e| token::estimate_tokens(e)).sum();

    for (i, file) in files.iter().enumerate() {
        if header_tokens + used <= budget {
            break;
        }
        let overflow = header_tokens + used - budget;
        let current = token::estimate_tokens(&original[i]);
        used -= current;
        entries[i] = None;
        if overflow < current
            && let Some(cut) = truncate_pinned(file, current - overflow)
        {
            used += token::estimate_tokens(&cut);
            entries[i] = Some(cut);
        }
    }

    let included: Vec<usize> = (0..files.len()).filter(|&i| entries[i].is_some()).collect();
    let kept_tokens: usize = entries.iter().flatten().map(|e| token::estimate_tokens(e)).sum();
    let original_tokens: usize = original.iter().map(|e| token::estimate_tokens(e)).sum();
    let text = if included.is_empty() {
        String::new()
    } else {
        let mut text = format!("{FILES_HEADER}\n");
        for entry in entries.iter().flatten() {
            text.push_str(entry);
        }
        text
    };
    Section {
        text,
        tokens: if included.is_empty() { 0 } else { header_tokens + kept_tokens },
        total: files.len(),
        dropped_tokens: original_tokens - kept_tokens,
        included,
    }
}

/// Render `file` cut to at most `max_tokens`, keeping whole leading lines
/// where possible. `None` when nothing but the marker would fit.
fn truncate_pinned(file: &PinnedFile, max_tokens: usize) -> Option<String> {
    let frame = render_pinned(&file.path, "").len() + TRUNCATED_MARKER.len();
    let room = (max_tokens * 4).checked_sub(frame)?;
    let mut cut = room.min(file.content.len());
    while !file.content.is_char_boundary(cut) {
        cut -= 1;
    }
    if let Some(nl) = file.content[..cut].rfind('\n') {
        cut = nl;
    }
    if cut == 0 {
        return None;
    }
    let entry = render_pinned(&file.path, &format!("{}{TRUNCATED_MARKER}", &file.content[..cut]));
    (token::estimate_tokens(&entry) <= max_tokens).then_some(entry)
}

// ── History ───────────────────────────────────────────────────────────────

struct HistorySelection {
    /// Messages before the current user message, chronological
    before: Vec<ChatMessage>,
    /// Messages after it (the in-progress tool exchange), chronological
    after: Vec<ChatMessage>,
    tokens: usize,
    turns_included: usize,
    drop: Option<DropInfo>,
}

/// Split turns into units that must be kept or dropped together: an
/// assistant turn with the tool turns that answer it, or a single turn.
fn units(turns: &[ConversationTurn], offset: usize) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < turns.len() {
        let mut end = i + 1;
        if turns[i].role == Role::Assistant && turns[i].has_tool_calls() {
            while end < turns.len() && turns[end].role == Role::Tool {
                end += 1;
            }
        }
        out.push(offset + i..offset + end);
        i = end;
    }
    out
}

fn tool_names(history: &[ConversationTurn]) -> HashMap<&str, &str> {
    history
        .iter()
        .flat_map(|t| t.tool_calls.iter())
        .map(|c| (c.id.as_str(), c.name.as_str()))
        .collect()
}

fn render_unit(turns: &[ConversationTurn], tool_names: &HashMap<&str, &str>) -> Vec<ChatMessage> {
    turns.iter().map(|t| render_turn(t, tool_names)).collect()
}

fn render_turn(turn: &ConversationTurn, tool_names: &HashMap<&str, &str>) -> ChatMessage {
    match turn.role {
        Role::Tool => {
            let id = turn.tool_call_id.as_deref().unwrap_or("?");
            let name = tool_names.get(id).copied().unwrap_or("tool");
            let status = turn.status.map(|s| s.to_string()).unwrap_or_default();
            ChatMessage::user(format!("Tool result [{name} {id}: {status}]\n{}", turn.content))
        }
        role => ChatMessage::new(role, turn.content.clone()),
    }
}

/// Newest units first: the in-progress exchange after the current message,
/// then earlier conversation. Stops at the first unit that does not fit so
/// the kept history stays contiguous. Only earlier conversation counts
/// against `max_turns`.
fn select_history(
    history: &[ConversationTurn],
    current_idx: usize,
    max_turns: usize,
    budget: usize,
) -> HistorySelection {
    let tool_names = tool_names(history);

    let after_units = units(&history[current_idx + 1..], current_idx + 1);
    let before_units = units(&history[..current_idx], 0);
    let ordered = after_units
        .iter()
        .rev()
        .map(|r| (true, r.clone()))
        .chain(before_units.iter().rev().map(|r| (false, r.clone())));

    let mut used = 0;
    let mut turns_included = 0;
    let mut window_turns = 0;
    let mut after: Vec<Vec<ChatMessage>> = Vec::new();
    let mut before: Vec<Vec<ChatMessage>> = Vec::new();
    let mut stop_reason: Option<&str> = None;
    let mut dropped_turns = 0;
    let mut dropped_tokens = 0;

    for (is_after, range) in ordered {
        let rendered = render_unit(&history[range.clone()], &tool_names);
        let cost = token::estimate_messages_tokens(&rendered);

        if stop_reason.is_none() {
            if !is_after && window_turns + range.len() > max_turns {
                stop_reason = Some("Older turns outside the history window");
            } else if used + cost > budget {
                stop_reason = Some("Oldest turns dropped (budget)");
            }
        }
        if stop_reason.is_some() {
            dropped_turns += range.len();
            dropped_tokens += cost;
            continue;
        }

        used += cost;
        turns_included += range.len();
        if is_after {
            after.push(rendered);
        } else {
            window_turns += range.len();
            before.push(rendered);
        }
    }

    after.reverse();
    before.reverse();
    HistorySelection {
        before: before.into_iter().flatten().collect(),
        after: after.into_iter().flatten().collect(),
        tokens: used,
        turns_included,
        drop: stop_reason.map(|reason| DropInfo {
            layer: LAYER_HISTORY.into(),
            items_dropped: dropped_turns,
            tokens_dropped: dropped_tokens,
            reason: reason.into(),
        }),
    }
}

/// Cut `text` to `max_chars` characters.
fn clip(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use llmcode_core::{ByteRange, FileChunk, ToolCall, ToolResult};

    const TOOLS: &str = "You are a code assistant.";

    fn assembler(max_tokens: usize) -> ContextAssembler {
        ContextAssembler::new(ContextBudget::new(max_tokens, 0))
    }

    fn pinned(path: &str, content: &str) -> PinnedFile {
        PinnedFile {
            path: path.into(),
            content: content.into(),
        }
    }

    fn chunk(path: &str, content: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: FileChunk {
                path: path.into(),
                byte_range: ByteRange::new(0, content.len()),
                content_hash: "h".into(),
                content: content.into(),
                embedding: vec![],
            },
            score,
            modified: None,
        }
    }

    fn summary(path: &str, text: &str) -> FileSummary {
        FileSummary {
            path: path.into(),
            content_hash: "h".into(),
            text: text.into(),
            generated_at: Utc::now(),
        }
    }

    fn assemble(
        asm: &ContextAssembler,
        history: &[ConversationTurn],
        snapshot: &ContextSnapshot,
    ) -> Result<AssembledPrompt, AssemblyError> {
        asm.assemble(&AssemblyInput {
            tools_prompt: TOOLS,
            history,
            snapshot,
        })
    }

    fn tool_batch(seq: usize) -> Vec<ConversationTurn> {
        let id = format!("call_{seq}_1");
        vec![
            ConversationTurn::assistant_with_calls(
                r#"{"tool": "git_status", "args": {}}"#,
                vec![ToolCall::new(&id, "git_status", serde_json::json!({}))],
            ),
            ConversationTurn::tool(&ToolResult::ok(&id, "Branch: main")),
        ]
    }

    #[test]
    fn minimal_prompt_is_system_plus_user() {
        let history = vec![ConversationTurn::user("Hello")];
        let prompt = assemble(&assembler(1000), &history, &ContextSnapshot::default()).unwrap();
        assert_eq!(prompt.messages.len(), 2);
        assert_eq!(prompt.messages[0].role, Role::System);
        assert_eq!(prompt.messages[0].content, TOOLS);
        assert_eq!(prompt.messages[1].content, "Hello");
        assert!(prompt.metadata.drops.is_empty());
    }

    #[test]
    fn budget_exceeded_when_user_message_cannot_fit() {
        let history = vec![ConversationTurn::user("x".repeat(400))];
        let err = assemble(&assembler(50), &history, &ContextSnapshot::default()).unwrap_err();
        assert!(matches!(err, AssemblyError::BudgetExceeded { .. }));
        assert!(err.to_string().contains("exceed budget"));
    }

    #[test]
    fn missing_user_message_is_an_error() {
        let err = assemble(&assembler(1000), &[], &ContextSnapshot::default()).unwrap_err();
        assert_eq!(err, AssemblyError::NoUserMessage);
    }

    #[test]
    fn response_reservation_shrinks_budget() {
        let asm = ContextAssembler::new(ContextBudget::new(1000, 600));
        let history = vec![ConversationTurn::user("Hello")];
        let prompt = assemble(&asm, &history, &ContextSnapshot::default()).unwrap();
        assert_eq!(prompt.metadata.budget, 400);
    }

    #[test]
    fn earliest_pinned_file_is_truncated_first() {
        let history = vec![ConversationTurn::user("refactor")];
        let snapshot = ContextSnapshot {
            pinned: vec![
                pinned("a.py", &"a".repeat(200)),
                pinned("b.py", &"b".repeat(200)),
                pinned("c.py", &"c".repeat(200)),
            ],
            ..Default::default()
        };
        // Room for two 200-char files and part of a third.
        let prompt = assemble(&assembler(150), &history, &snapshot).unwrap();
        let system = &prompt.messages[0].content;
        assert!(system.contains("### a.py"));
        assert!(!system.contains(&"a".repeat(200)));
        assert!(system.contains(TRUNCATED_MARKER));
        assert!(system.contains(&"b".repeat(200)));
        assert!(system.contains(&"c".repeat(200)));

        let drop = prompt.metadata.drop_for(LAYER_FILES).unwrap();
        assert_eq!(drop.items_dropped, 0);
        assert!(drop.tokens_dropped > 0);
        assert_eq!(prompt.metadata.layer(LAYER_FILES).unwrap().items_included, 3);
        assert!(prompt.metadata.total_tokens <= 150);
    }

    #[test]
    fn earliest_pinned_file_dropped_when_nothing_of_it_fits() {
        let history = vec![ConversationTurn::user("refactor")];
        let snapshot = ContextSnapshot {
            pinned: vec![
                pinned("first.py", &"f".repeat(400)),
                pinned("second.py", &"s".repeat(200)),
            ],
            ..Default::default()
        };
        let prompt = assemble(&assembler(85), &history, &snapshot).unwrap();
        let system = &prompt.messages[0].content;
        assert!(!system.contains("### first.py"));
        assert!(system.contains("### second.py"));
        assert_eq!(prompt.metadata.drop_for(LAYER_FILES).unwrap().items_dropped, 1);
        assert!(prompt.metadata.total_tokens <= 85);
    }

    #[test]
    fn oversized_pinned_file_is_cut_at_a_line_boundary() {
        let history = vec![ConversationTurn::user("explain")];
        let content: String = (0..400).map(|i| format!("line {i:04}\n")).collect();
        let snapshot = ContextSnapshot {
            pinned: vec![pinned("big.py", &content)],
            ..Default::default()
        };
        let prompt = assemble(&assembler(300), &history, &snapshot).unwrap();
        let system = &prompt.messages[0].content;
        assert!(system.contains("### big.py\n```\nline 0000\n"));
        assert!(system.contains(&format!("\n{}", TRUNCATED_MARKER.trim_start())));
        assert!(!system.contains("line 0399"));
        assert!(prompt.metadata.total_tokens <= 300);
    }

    #[test]
    fn tool_batches_kept_or_dropped_whole() {
        let mut history = vec![ConversationTurn::user("first"), ConversationTurn::assistant("ok")];
        history.extend(tool_batch(2));
        history.push(ConversationTurn::assistant("done"));
        history.push(ConversationTurn::user("second"));

        // Window of two turns: "done" fits, the batch of two would exceed it.
        let asm = assembler(1000).with_history_turns(2);
        let prompt = assemble(&asm, &history, &ContextSnapshot::default()).unwrap();
        let contents: Vec<&str> = prompt.messages[1..].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["done", "second"]);

        let asm = assembler(1000).with_history_turns(3);
        let prompt = assemble(&asm, &history, &ContextSnapshot::default()).unwrap();
        assert_eq!(prompt.messages.len(), 5);
        assert!(prompt.messages[2].content.starts_with("Tool result [git_status call_2_1: ok]"));

        let drop = prompt.metadata.drop_for(LAYER_HISTORY).unwrap();
        assert_eq!(drop.items_dropped, 2);
    }

    #[test]
    fn in_progress_exchange_follows_current_message() {
        let mut history = vec![ConversationTurn::user("check git")];
        history.extend(tool_batch(1));
        let prompt = assemble(&assembler(1000), &history, &ContextSnapshot::default()).unwrap();
        let roles: Vec<Role> = prompt.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(prompt.messages[1].content, "check git");
    }

    #[test]
    fn large_tool_batch_is_not_cut_by_history_window() {
        let mut history = vec![
            ConversationTurn::user("earlier"),
            ConversationTurn::assistant("earlier answer"),
            ConversationTurn::user("read everything"),
        ];
        let calls: Vec<ToolCall> = (1..=20)
            .map(|k| ToolCall::new(format!("call_2_{k}"), "read_file", serde_json::json!({"path": format!("f{k}.py")})))
            .collect();
        let ids: Vec<String> = calls.iter().map(|c| c.id.clone()).collect();
        history.push(ConversationTurn::assistant_with_calls("reading", calls));
        for id in &ids {
            history.push(ConversationTurn::tool(&ToolResult::ok(id, "x = 1")));
        }

        let prompt = assemble(&assembler(100_000), &history, &ContextSnapshot::default()).unwrap();
        let results = prompt
            .messages
            .iter()
            .filter(|m| m.content.starts_with("Tool result [read_file"))
            .count();
        assert_eq!(results, 20);
        assert!(prompt.messages.iter().any(|m| m.content == "earlier answer"));

        let asm = assembler(100_000).with_history_turns(1);
        let prompt = assemble(&asm, &history, &ContextSnapshot::default()).unwrap();
        let contents: Vec<&str> = prompt.messages[1..4].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["earlier answer", "read everything", "reading"]);
        assert_eq!(prompt.messages.len(), 24);
    }

    #[test]
    fn latest_tool_round_survives_pinned_files() {
        let mut history = vec![ConversationTurn::user("check git")];
        history.extend(tool_batch(1));
        let snapshot = ContextSnapshot {
            pinned: vec![pinned("huge.py", &"h".repeat(4000))],
            ..Default::default()
        };
        let prompt = assemble(&assembler(120), &history, &snapshot).unwrap();
        assert!(
            prompt
                .messages
                .last()
                .unwrap()
                .content
                .starts_with("Tool result [git_status call_1_1: ok]")
        );
        assert!(prompt.metadata.total_tokens <= 120);
    }

    #[test]
    fn budget_exceeded_when_latest_tool_round_cannot_fit() {
        let mut history = vec![ConversationTurn::user("dump it")];
        history.push(ConversationTurn::assistant_with_calls(
            "reading",
            vec![ToolCall::new("call_1_1", "read_file", serde_json::json!({"path": "a.txt"}))],
        ));
        history.push(ConversationTurn::tool(&ToolResult::ok("call_1_1", "y".repeat(2000))));
        let err = assemble(&assembler(200), &history, &ContextSnapshot::default()).unwrap_err();
        match err {
            AssemblyError::BudgetExceeded { pending_tokens, .. } => assert!(pending_tokens > 200),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn history_drops_oldest_under_budget() {
        let mut history = Vec::new();
        for i in 0..10 {
            history.push(ConversationTurn::user(format!("question {i} {}", "q".repeat(80))));
            history.push(ConversationTurn::assistant(format!("answer {i} {}", "a".repeat(80))));
        }
        history.push(ConversationTurn::user("latest"));

        let prompt = assemble(&assembler(200), &history, &ContextSnapshot::default()).unwrap();
        assert!(prompt.metadata.total_tokens <= 200);
        assert_eq!(prompt.messages.last().unwrap().content, "latest");
        assert!(prompt.messages[prompt.messages.len() - 2].content.starts_with("answer 9"));
        assert!(!prompt.messages.iter().any(|m| m.content.starts_with("question 0")));
    }

    #[test]
    fn retrieved_chunks_and_their_summaries() {
        let history = vec![ConversationTurn::user("parse config")];
        let snapshot = ContextSnapshot {
            pinned: vec![pinned("main.py", "import config")],
            retrieved: vec![
                chunk("config.py", "def parse_config(): ...", 0.91),
                chunk("main.py", "import config", 0.88),
                chunk("util.py", "def helper(): ...", 0.5),
            ],
            summaries: vec![
                summary("config.py", "Loads and validates configuration."),
                summary("main.py", "Entry point."),
                summary("other.py", "Unrelated."),
            ],
        };
        let prompt = assemble(&assembler(2000), &history, &snapshot).unwrap();
        let system = &prompt.messages[0].content;

        let files = system.find("## Included Files").unwrap();
        let code = system.find("## Retrieved Code").unwrap();
        let sums = system.find("## File Summaries").unwrap();
        assert!(files < code && code < sums);

        assert!(system.contains("### config.py (bytes 0-23, score 0.91)"));
        assert!(system.contains("### util.py"));
        // Pinned files are not repeated as chunks or summaries.
        assert!(!system.contains("### main.py (bytes"));
        assert!(!system.contains("- main.py: Entry point."));
        assert!(system.contains("- config.py: Loads and validates configuration."));
        assert!(!system.contains("other.py"));
    }

    #[test]
    fn long_summaries_are_clipped() {
        let history = vec![ConversationTurn::user("q")];
        let snapshot = ContextSnapshot {
            retrieved: vec![chunk("a.py", "x", 0.9)],
            summaries: vec![summary("a.py", &"s".repeat(50))],
            ..Default::default()
        };
        let asm = assembler(2000).with_max_summary_chars(10);
        let prompt = assemble(&asm, &history, &snapshot).unwrap();
        assert!(prompt.messages[0].content.contains(&format!("- a.py: {}...\n", "s".repeat(10))));
    }

    #[test]
    fn total_never_exceeds_budget() {
        let mut history = Vec::new();
        for i in 0..6 {
            history.push(ConversationTurn::user(format!("u{i} {}", "x".repeat(i * 37))));
            history.extend(tool_batch(i));
        }
        history.push(ConversationTurn::user("now"));
        let snapshot = ContextSnapshot {
            pinned: vec![pinned("a.py", &"p".repeat(333)), pinned("b.py", &"q".repeat(97))],
            retrieved: (0..8)
                .map(|i| chunk(&format!("f{i}.py"), &"c".repeat(31 * (i + 1)), 0.9 - i as f32 * 0.05))
                .collect(),
            summaries: (0..8).map(|i| summary(&format!("f{i}.py"), &"s".repeat(57))).collect(),
        };
        for max in [60, 90, 150, 300, 600, 1200, 5000] {
            let prompt = assemble(&assembler(max), &history, &snapshot).unwrap();
            assert!(
                prompt.metadata.total_tokens <= max,
                "{} > {max}",
                prompt.metadata.total_tokens
            );
            assert_eq!(prompt.messages.last().unwrap().content, "now");
        }
    }

    #[test]
    fn assembly_is_deterministic() {
        let mut history = vec![ConversationTurn::user("a")];
        history.extend(tool_batch(1));
        history.push(ConversationTurn::user("b"));
        let snapshot = ContextSnapshot {
            retrieved: vec![chunk("x.py", "x", 0.7), chunk("y.py", "y", 0.6)],
            ..Default::default()
        };
        let asm = assembler(500);
        let first = assemble(&asm, &history, &snapshot).unwrap();
        let second = assemble(&asm, &history, &snapshot).unwrap();
        assert_eq!(first.messages, second.messages);
        assert_eq!(first.metadata.total_tokens, second.metadata.total_tokens);
    }
}
