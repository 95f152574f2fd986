// SPDX-License-Identifier: MIT OR Apache-2.0
//! `manage_context_budget`: pack fetched node texts into `state.context_blocks`
//! under a fixed token contract, compacting per-language where the configured
//! rules call for it, and either committing the whole pack or declaring the
//! step over budget — it never commits a half-packed context.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use rag_core::pipeline::StepDef;
use rag_core::state::State;
use rag_engine::{Action, Runtime};
use rag_error::{ErrorCode, RagError, Result};

use crate::params::{opt_str, u32_or};

const DEFAULT_N_CTX: u32 = 8192;
const DEFAULT_FIXED_PROMPT_TOKENS: u32 = 512;
const DEFAULT_MAX_HISTORY_TOKENS: u32 = 1024;
const DEFAULT_MAX_CONTEXT_TOKENS: u32 = 4096;
const DEFAULT_OUT_TOKENS: u32 = 1024;
const DEFAULT_SAFETY_MARGIN: u32 = 256;
const DEFAULT_DEMAND_TOPIC: &str = "demand";
// Rough token-per-character ratio; good enough for packing decisions, not
// meant to match any particular tokenizer exactly.
const CHARS_PER_TOKEN: usize = 4;

/// `fail_fast`: stop and report over-budget rather than dropping content.
/// `auto_clamp`: drop lowest-priority node texts until the pack fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetContractPolicy {
    /// Refuse to drop content; route `on_over` instead.
    FailFast,
    /// Drop lowest-priority content until the remaining set fits.
    AutoClamp,
}

impl BudgetContractPolicy {
    fn parse(s: &str) -> Self {
        if s == "auto_clamp" {
            Self::AutoClamp
        } else {
            Self::FailFast
        }
    }
}

/// One node dropped (or would need to be dropped) to make the pack fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetClamp {
    /// The dropped node's id.
    pub node_id: String,
    /// Why it was dropped.
    pub reason: String,
}

/// The outcome of a `manage_context_budget` invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetContractResult {
    /// Whether the final pack fit within `max_context_tokens`.
    pub fits: bool,
    /// Nodes clamped (dropped) to make it fit, if `auto_clamp` was used.
    pub clamps: Vec<BudgetClamp>,
    /// Estimated tokens occupied by the committed context.
    pub packed_tokens: u32,
}

fn estimate_tokens(s: &str) -> u32 {
    ((s.len() + CHARS_PER_TOKEN - 1) / CHARS_PER_TOKEN).max(if s.is_empty() { 0 } else { 1 }) as u32
}

/// Compacts a node's text based on its file extension, trimming the kind of
/// noise that a language-aware reader would skip anyway. Stands in for the
/// embedded T-SQL summarizer / .NET code compressor these rules dispatch to.
fn compact_for_language(path: Option<&str>, text: &str) -> String {
    let ext = path.and_then(|p| p.rsplit('.').next()).unwrap_or("");
    let stripped: String = match ext {
        "sql" => text
            .lines()
            .filter(|l| !l.trim_start().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n"),
        "cs" => text
            .lines()
            .filter(|l| !l.trim_start().starts_with("///"))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => text.to_string(),
    };
    let mut out = String::with_capacity(stripped.len());
    let mut last_blank = false;
    for line in stripped.lines() {
        let blank = line.trim().is_empty();
        if blank && last_blank {
            continue;
        }
        out.push_str(line);
        out.push('\n');
        last_blank = blank;
    }
    out
}

/// Maps a node's path to the language its compaction rule is keyed on.
fn classify_language(path: Option<&str>) -> Option<&'static str> {
    let ext = path?.rsplit('.').next()?;
    match ext {
        "sql" => Some("sql"),
        "cs" => Some("dotnet"),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompactPolicy {
    Always,
    Threshold,
    Demand,
}

struct CompactRule {
    policy: CompactPolicy,
    threshold: Option<f64>,
    inbox_key: Option<String>,
}

/// Reads `raw.compact_code.rules: [{language, policy, threshold?, inbox_key?}]`.
fn parse_compact_rules(step: &StepDef) -> HashMap<String, CompactRule> {
    let mut rules = HashMap::new();
    let Some(entries) =
        step.raw.get("compact_code").and_then(|v| v.get("rules")).and_then(Value::as_array)
    else {
        return rules;
    };
    for entry in entries {
        let Some(obj) = entry.as_object() else { continue };
        let Some(language) = obj.get("language").and_then(Value::as_str) else { continue };
        let policy = match obj.get("policy").and_then(Value::as_str) {
            Some("always") => CompactPolicy::Always,
            Some("demand") => CompactPolicy::Demand,
            _ => CompactPolicy::Threshold,
        };
        let threshold = obj.get("threshold").and_then(Value::as_f64);
        let inbox_key = obj.get("inbox_key").and_then(Value::as_str).map(str::to_string);
        rules.insert(language.to_string(), CompactRule { policy, threshold, inbox_key });
    }
    rules
}

/// Whether a node should be compacted, per its language's rule.
fn should_compact(
    rule: Option<&CompactRule>,
    tokens_raw: u32,
    max_context_tokens: u32,
    consumed_demand_topics: &HashSet<&str>,
) -> bool {
    let Some(rule) = rule else { return false };
    match rule.policy {
        CompactPolicy::Always => true,
        CompactPolicy::Threshold => {
            let threshold = rule.threshold.unwrap_or(1.0);
            f64::from(tokens_raw) > threshold * f64::from(max_context_tokens)
        }
        CompactPolicy::Demand => {
            consumed_demand_topics.contains(rule.inbox_key.as_deref().unwrap_or(DEFAULT_DEMAND_TOPIC))
        }
    }
}

/// The canonical context block: a header carrying the node's id/path/
/// language/compaction flag, followed by its (possibly compacted) text.
fn format_node_block(id: &str, path: Option<&str>, language: Option<&str>, compact: bool, text: &str) -> String {
    format!(
        "--- NODE ---\nid: {id}\npath: {}\nlanguage: {}\ncompact: {compact}\n{text}",
        path.unwrap_or(""),
        language.unwrap_or(""),
    )
}

/// Packs `state.node_texts` into `state.context_blocks` under a fixed
/// token contract.
pub struct ManageContextBudget;

#[async_trait]
impl Action for ManageContextBudget {
    fn action_id(&self) -> &str {
        "manage_context_budget"
    }

    fn log_in(&self, _step: &StepDef, state: &State) -> Value {
        json!({ "node_texts": state.node_texts.len(), "context_blocks": state.context_blocks.len() })
    }

    fn log_out(&self, _next: &Option<String>, state: &State) -> Value {
        json!({ "context_blocks": state.context_blocks.len() })
    }

    async fn do_execute(
        &self,
        step: &StepDef,
        state: &mut State,
        _runtime: &Runtime,
    ) -> Result<Option<String>> {
        let n_ctx = u32_or(step, "n_ctx", DEFAULT_N_CTX);
        let fixed_prompt_tokens = u32_or(step, "fixed_prompt_tokens", DEFAULT_FIXED_PROMPT_TOKENS);
        let max_history_tokens = u32_or(step, "max_history_tokens", DEFAULT_MAX_HISTORY_TOKENS);
        let max_context_tokens = u32_or(step, "max_context_tokens", DEFAULT_MAX_CONTEXT_TOKENS);
        let out_tokens = u32_or(step, "out_tokens", DEFAULT_OUT_TOKENS);
        let safety_margin = u32_or(step, "safety_margin", DEFAULT_SAFETY_MARGIN);

        let committed = fixed_prompt_tokens
            .saturating_add(max_history_tokens)
            .saturating_add(max_context_tokens)
            .saturating_add(out_tokens)
            .saturating_add(safety_margin);
        if committed > n_ctx {
            return Err(RagError::new(
                ErrorCode::BudgetMisconfig,
                format!(
                    "step '{}': fixed_prompt({fixed_prompt_tokens}) + max_history({max_history_tokens}) + \
                     max_context({max_context_tokens}) + out({out_tokens}) + safety_margin({safety_margin}) \
                     = {committed} exceeds n_ctx({n_ctx})",
                    step.id
                ),
            ));
        }

        let policy = BudgetContractPolicy::parse(opt_str(step, "policy").unwrap_or("fail_fast"));
        let rules = parse_compact_rules(step);
        let consumed_demand_topics: HashSet<&str> =
            state.inbox_last_consumed.iter().map(|m| m.topic.as_str()).collect();

        let formatted: Vec<(String, u32)> = state
            .node_texts
            .iter()
            .map(|t| {
                let tokens_raw = estimate_tokens(&t.text);
                let language = classify_language(t.path.as_deref());
                let rule = language.and_then(|l| rules.get(l));
                let compact = should_compact(rule, tokens_raw, max_context_tokens, &consumed_demand_topics);
                let text =
                    if compact { compact_for_language(t.path.as_deref(), &t.text) } else { t.text.clone() };
                let block = format_node_block(&t.id, t.path.as_deref(), language, compact, &text);
                let tokens = estimate_tokens(&block);
                (block, tokens)
            })
            .collect();

        // A node whose own formatted block already exceeds the budget can
        // never be packed, no matter what else is dropped or already held.
        if let Some((idx, _)) = formatted.iter().enumerate().find(|(_, (_, tokens))| *tokens > max_context_tokens) {
            return Err(RagError::new(
                ErrorCode::BudgetMisconfig,
                format!(
                    "step '{}': node '{}' alone exceeds max_context_tokens({max_context_tokens})",
                    step.id, state.node_texts[idx].id
                ),
            ));
        }

        let mut packed_tokens: u32 = state.context_blocks.iter().map(|b| estimate_tokens(b)).sum();
        let mut clamps = Vec::new();
        let mut committed_blocks = Vec::new();
        let mut over = false;

        for (idx, (block, tokens)) in formatted.iter().enumerate() {
            if packed_tokens.saturating_add(*tokens) > max_context_tokens {
                match policy {
                    BudgetContractPolicy::AutoClamp => {
                        clamps.push(BudgetClamp {
                            node_id: state.node_texts[idx].id.clone(),
                            reason: "exceeds remaining context budget".to_string(),
                        });
                        continue;
                    }
                    BudgetContractPolicy::FailFast => {
                        over = true;
                        break;
                    }
                }
            }
            packed_tokens += tokens;
            committed_blocks.push(block.clone());
        }

        if policy == BudgetContractPolicy::AutoClamp && committed_blocks.is_empty() && !formatted.is_empty() {
            return Err(RagError::new(
                ErrorCode::BudgetClampInfeasible,
                format!("step '{}': no node fits within max_context_tokens({max_context_tokens}) even alone", step.id),
            ));
        }

        let result = if over {
            BudgetContractResult { fits: false, clamps: Vec::new(), packed_tokens: 0 }
        } else {
            BudgetContractResult { fits: clamps.is_empty(), clamps, packed_tokens }
        };

        if !result.fits {
            // Transactional: an over-budget step commits nothing, and
            // re-queues any `demand` messages it consumed so the next
            // attempt sees them again.
            let demand_messages: Vec<_> =
                state.inbox_last_consumed.iter().filter(|m| m.topic == DEFAULT_DEMAND_TOPIC).cloned().collect();
            for msg in demand_messages {
                state.enqueue_message(step.id.clone(), msg.topic, msg.payload, msg.sender_step_id)?;
            }
            if let Some(demand_step_id) = opt_str(step, "demand_step_id") {
                state.enqueue_message(
                    demand_step_id,
                    DEFAULT_DEMAND_TOPIC,
                    Some(json!({ "reason": "context_budget_over" })),
                    Some(step.id.clone()),
                )?;
            }
        } else {
            if let Some(divider) = opt_str(step, "divide_new_content") {
                for block in &mut state.context_blocks {
                    if let Some(stripped) = block.strip_prefix(divider) {
                        *block = stripped.to_string();
                    }
                }
            }
            let mut to_append = committed_blocks;
            if let Some(divider) = opt_str(step, "divide_new_content") {
                if let Some(first) = to_append.first_mut() {
                    *first = format!("{divider}{first}");
                }
            }
            state.context_blocks.extend(to_append);
            state.node_texts.clear();
        }

        if result.fits {
            Ok(step.on("on_ok").map(str::to_string).or_else(|| step.next().map(str::to_string)))
        } else {
            Ok(step.on("on_over").map(str::to_string).or_else(|| step.next().map(str::to_string)))
        }
    }
}
