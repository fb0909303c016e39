//! Tree-of-thought repair pipeline.
//!
//! Four stages over the LLM oracle: comprehend (sample then aggregate),
//! fault-localize (sample, judge, prune), suggest-repair (sample, judge,
//! prune per location), generate-patch. Feedback rounds re-enter at
//! suggest-repair carrying the unified diffs of every failed candidate.
//!
//! Every oracle exchange is dumped under `{WDIR}/model_interaction/` for
//! offline inspection.

use crate::config::{Ablation, PipelineConfig};
use crate::oracle::OracleClient;
use crate::prompts::*;
use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

/// Oracle seam. The HTTP client implements it; tests script it.
pub trait Oracle {
    fn request(&self, system_msg: &str, prompt: &str) -> Result<String>;
}

impl Oracle for OracleClient {
    fn request(&self, system_msg: &str, prompt: &str) -> Result<String> {
        OracleClient::request(self, system_msg, prompt)
    }
}

/// Crash context the pipeline prompts from. Single-use, produced by the
/// instrumented except-handler.
#[derive(Debug, Clone, Default)]
pub struct CrashContext {
    pub func_name: String,
    pub exception_msg: String,
    pub exception_trace: String,
    pub target_line: String,
    pub buggy_code: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ComprehendResponse {
    exception_description: String,
    rationale: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RootCause {
    desc: String,
    rationale: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LocationResponse {
    code: String,
    rationale: String,
}

#[derive(Debug, Clone, Deserialize)]
struct StrategyResponse {
    summary: String,
    detailed_strategy: String,
    rationale: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PatchResponse {
    patched_code: String,
    #[serde(default)]
    rationale: String,
}

#[derive(Debug, Clone)]
struct Strategy {
    location: String,
    summary: String,
    detailed_strategy: String,
    rationale: String,
    eval_score: f64,
}

/// A generated candidate, ready for compilation and validation.
#[derive(Debug, Clone)]
pub struct PatchCandidate {
    pub location: String,
    pub patched_code: String,
    pub rationale: String,
}

/// One repair session's pipeline state.
pub struct PatchModel<'a> {
    oracle: &'a dyn Oracle,
    knobs: PipelineConfig,
    ablation: Ablation,
    interaction_dir: PathBuf,
    ctx: CrashContext,

    feedback_trial: usize,
    prev_failed_patches: Vec<String>,

    root_cause: RootCause,
    fault_localization: Vec<(String, f64, String)>,
    final_strategies: Vec<Strategy>,
    pub patches: Vec<PatchCandidate>,
}

impl<'a> PatchModel<'a> {
    pub fn new(
        oracle: &'a dyn Oracle,
        knobs: PipelineConfig,
        ablation: Ablation,
        wdir: PathBuf,
        ctx: CrashContext,
    ) -> Self {
        Self {
            oracle,
            knobs,
            ablation,
            interaction_dir: wdir.join("model_interaction"),
            ctx,
            feedback_trial: 0,
            prev_failed_patches: Vec::new(),
            root_cause: RootCause::default(),
            fault_localization: Vec::new(),
            final_strategies: Vec::new(),
            patches: Vec::new(),
        }
    }

    fn dynamic_context(&self) -> bool {
        self.ablation != Ablation::NoDynamicContext
    }

    /// Initial pipeline run: all four stages.
    pub fn run(&mut self) -> Result<()> {
        self.feedback_trial = 0;
        self.prev_failed_patches.clear();

        if self.ablation == Ablation::SingleShot {
            return self.singleton_patch_gen();
        }

        self.comprehend()?;
        self.fault_localize()?;
        self.suggest_repair()?;
        self.gen_patch()
    }

    /// Feedback round: re-enter at suggest-repair with the failed diffs.
    /// Comprehension and localization are not re-run.
    pub fn feedback_patch_gen(&mut self, failed_diffs: Vec<String>) -> Result<()> {
        if self.ablation != Ablation::NoFeedback {
            self.prev_failed_patches.extend(failed_diffs);
        }
        self.final_strategies.clear();
        self.patches.clear();

        if self.ablation == Ablation::SingleShot {
            return self.singleton_patch_gen();
        }
        self.suggest_repair()?;
        self.gen_patch()
    }

    // =========================================================================
    // Stage 1: Comprehend
    // =========================================================================

    fn comprehend(&mut self) -> Result<()> {
        eprintln!("[pipeline] Finding root cause ...");

        let template = if self.dynamic_context() {
            COMPREHEND_MESSAGE
        } else {
            COMPREHEND_MESSAGE_WO_DC
        };
        let msg = self.fill_context(template);

        let mut samples: Vec<ComprehendResponse> = Vec::new();
        for i in 0..self.knobs.max_trial {
            let parsed: ComprehendResponse =
                self.request_json(&msg, &format!("comprehend_{}", i))?;
            samples.push(parsed);
        }

        eprintln!("[pipeline] Aggregating {} comprehension samples ...", samples.len());
        let mut descs = String::new();
        let mut rationales = String::new();
        for (i, sample) in samples.iter().enumerate() {
            descs.push_str(&format!("{}. {}\n", i, sample.exception_description));
            rationales.push_str(&format!("{}. {}\n", i, sample.rationale));
        }
        let agg_msg = COMPREHEND_AGGREGATE_MESSAGE
            .replace("<desc>", &descs)
            .replace("<rationale>", &rationales);

        let aggregate: RootCause = self.request_json(&agg_msg, "comprehend_aggregate")?;
        self.root_cause = aggregate;
        Ok(())
    }

    // =========================================================================
    // Stage 2: Fault localization
    // =========================================================================

    fn fault_localize(&mut self) -> Result<()> {
        eprintln!("[pipeline] Localizing fault locations ...");

        let template = if self.dynamic_context() {
            SELECT_LOCATIONS_MESSAGE
        } else {
            SELECT_LOCATIONS_MESSAGE_WO_DC
        };
        let msg = self.fill_root_cause(&self.fill_context(template));

        let mut candidates: Vec<LocationResponse> = Vec::new();
        for i in 0..self.knobs.fl_branch_num {
            let parsed: LocationResponse =
                self.request_json(&msg, &format!("fault_localize_{}", i))?;
            candidates.push(parsed);
        }

        eprintln!("[pipeline] Scoring {} candidate fix locations ...", candidates.len());
        let eval_template = if self.dynamic_context() {
            LOCATIONS_EVAL_MESSAGE
        } else {
            LOCATIONS_EVAL_MESSAGE_WO_DC
        };
        let eval_base = self.fill_root_cause(&self.fill_context(eval_template));

        let mut scored: Vec<(String, f64, String)> = Vec::new();
        for (i, loc) in candidates.iter().enumerate() {
            let eval_msg = eval_base
                .replace("<candidate_code>", &loc.code)
                .replace("<candidate_rationale>", &loc.rationale);
            let score = self.request_score(&eval_msg, &format!("fault_localize_eval_loc{}", i))?;
            scored.push((loc.code.clone(), score, loc.rationale.clone()));
        }

        // greedy pruning; ties keep arrival order (stable sort)
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.knobs.fl_select_num);
        eprintln!("[pipeline] Kept {} fix location(s)", scored.len());
        self.fault_localization = scored;
        Ok(())
    }

    // =========================================================================
    // Stage 3: Suggest repair
    // =========================================================================

    fn suggest_repair(&mut self) -> Result<()> {
        eprintln!("[pipeline] Suggesting repair strategies ...");

        let template = if self.dynamic_context() {
            FIX_STRATEGY_MESSAGE
        } else {
            FIX_STRATEGY_MESSAGE_WO_DC
        };
        let base = self.fill_root_cause(&self.fill_context(template));

        let mut candidates: Vec<Strategy> = Vec::new();
        let locations = self.fault_localization.clone();
        for loc in &locations {
            let mut msg = base
                .replace("<candidate_code>", &loc.0)
                .replace("<candidate_rationale>", &loc.2);

            if !self.prev_failed_patches.is_empty() {
                self.feedback_trial += 1;
                msg.push_str(&FIX_STRATEGY_FEEDBACK.replace(
                    "<prev_failed_patches>",
                    &self.failed_patch_listing(),
                ));
            }

            for i in 0..self.knobs.sr_branch_num {
                let parsed: StrategyResponse = self.request_json(
                    &msg,
                    &format!("suggest_repair_trial{}_fb{}", i, self.feedback_trial),
                )?;
                candidates.push(Strategy {
                    location: loc.0.clone(),
                    summary: parsed.summary,
                    detailed_strategy: parsed.detailed_strategy,
                    rationale: parsed.rationale,
                    eval_score: 0.0,
                });
            }
        }

        eprintln!("[pipeline] Scoring {} candidate strategies ...", candidates.len());
        let eval_template = if self.dynamic_context() {
            STRATEGY_EVAL_MESSAGE
        } else {
            STRATEGY_EVAL_MESSAGE_WO_DC
        };
        let eval_base = self
            .fill_root_cause(&self.fill_context(eval_template))
            .replace("<target_code>", &self.ctx.buggy_code);

        for (i, strategy) in candidates.iter_mut().enumerate() {
            let eval_msg = eval_base
                .replace("<candidate_code>", &strategy.location)
                .replace("<strat_summary>", &strategy.summary)
                .replace("<strat_detail>", &strategy.detailed_strategy)
                .replace("<strat_rationale>", &strategy.rationale);
            strategy.eval_score = self.request_score(
                &eval_msg,
                &format!("suggest_repair_eval_strategy{}_fb{}", i, self.feedback_trial),
            )?;
        }

        // per-location pruning, best first
        let locations_order: Vec<String> = locations.iter().map(|l| l.0.clone()).collect();
        for location in locations_order {
            let mut group: Vec<Strategy> = candidates
                .iter()
                .filter(|s| s.location == location)
                .cloned()
                .collect();
            group.sort_by(|a, b| {
                b.eval_score
                    .partial_cmp(&a.eval_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            group.truncate(self.knobs.sr_select_num);
            self.final_strategies.extend(group);
        }

        eprintln!("[pipeline] Kept {} final strategy(ies)", self.final_strategies.len());
        Ok(())
    }

    // =========================================================================
    // Stage 4: Generate patch
    // =========================================================================

    fn gen_patch(&mut self) -> Result<()> {
        eprintln!("[pipeline] Generating patches ...");

        let template = if self.dynamic_context() {
            GEN_PATCH_MESSAGE
        } else {
            GEN_PATCH_MESSAGE_WO_DC
        };
        let base = self
            .fill_root_cause(&self.fill_context(template))
            .replace("<buggy_function_code>", &self.ctx.buggy_code);

        let strategies = self.final_strategies.clone();
        for (i, strategy) in strategies.iter().enumerate() {
            let mut msg = base
                .replace("<candidate_code>", &strategy.location)
                .replace("<strat_summary>", &strategy.summary)
                .replace("<strat_detail>", &strategy.detailed_strategy)
                .replace("<strat_rationale>", &strategy.rationale);

            if !self.prev_failed_patches.is_empty() {
                msg.push_str(&GEN_PATCH_FEEDBACK.replace(
                    "<prev_failed_patches>",
                    &self.failed_patch_listing(),
                ));
            }

            let label = format!("gen_patch_{}_fb{}", i, self.feedback_trial);
            match self.request_patch_list(&msg, &label) {
                Ok(batch) => {
                    for patch in batch {
                        self.patches.push(PatchCandidate {
                            location: strategy.location.clone(),
                            // some backends double every % sign on the way through
                            patched_code: patch.patched_code.replace("%%", "%"),
                            rationale: patch.rationale,
                        });
                    }
                }
                Err(e) => {
                    eprintln!("[pipeline] Dropping strategy {}: {}", i, e);
                }
            }
        }

        eprintln!("[pipeline] Generated {} patch candidate(s)", self.patches.len());
        Ok(())
    }

    /// Ablation: one call, full rewrite, no tree-of-thought.
    fn singleton_patch_gen(&mut self) -> Result<()> {
        eprintln!("[pipeline] Generating patch (single-shot) ...");

        let mut msg = self.fill_context(SINGLETON_PATCH_GEN);
        if !self.prev_failed_patches.is_empty() {
            msg.push_str(
                &GEN_PATCH_FEEDBACK.replace("<prev_failed_patches>", &self.failed_patch_listing()),
            );
        }

        let label = format!("gen_patch_fb{}", self.feedback_trial);
        let patch: PatchResponse = self.request_json(&msg, &label)?;
        self.patches.push(PatchCandidate {
            location: String::new(),
            patched_code: patch.patched_code.replace("%%", "%"),
            rationale: patch.rationale,
        });
        Ok(())
    }

    // =========================================================================
    // Oracle plumbing
    // =========================================================================

    fn fill_context(&self, template: &str) -> String {
        template
            .replace("<exception_log>", &self.ctx.exception_msg)
            .replace("<exception_message>", &self.ctx.exception_msg)
            .replace("<stack_trace>", &self.ctx.exception_trace)
            .replace("<buggy_code>", &self.ctx.buggy_code)
    }

    fn fill_root_cause(&self, template: &str) -> String {
        template
            .replace("<rc_desc>", &self.root_cause.desc)
            .replace("<rc_rationale>", &self.root_cause.rationale)
    }

    fn failed_patch_listing(&self) -> String {
        let mut listing = String::new();
        for (i, patch) in self.prev_failed_patches.iter().enumerate() {
            listing.push_str(&format!("{}. ```\n{}\n```\n", i, patch));
        }
        listing
    }

    /// One JSON-typed oracle call with the bounded decode-retry budget.
    fn request_json<T: DeserializeOwned>(&self, prompt: &str, label: &str) -> Result<T> {
        for _ in 0..self.knobs.json_retries {
            let raw = self.oracle.request(SYSTEM_MESSAGE, prompt)?;
            match serde_json::from_str::<T>(&raw) {
                Ok(parsed) => {
                    self.save_interaction(prompt, &raw, label);
                    return Ok(parsed);
                }
                Err(e) => {
                    eprintln!("[pipeline] JSON decode error in {} response, retrying: {}", label, e);
                }
            }
        }
        Err(anyhow!(
            "Oracle produced no valid JSON for {} within {} attempts",
            label,
            self.knobs.json_retries
        ))
    }

    /// A judge call returning a bare scalar in [0,1].
    fn request_score(&self, prompt: &str, label: &str) -> Result<f64> {
        for _ in 0..self.knobs.json_retries {
            let raw = self.oracle.request(SYSTEM_MESSAGE, prompt)?;
            match raw.trim().parse::<f64>() {
                Ok(score) => {
                    self.save_interaction(prompt, &raw, label);
                    return Ok(score);
                }
                Err(_) => {
                    eprintln!("[pipeline] Non-numeric score in {} response, retrying", label);
                }
            }
        }
        Err(anyhow!(
            "Oracle produced no numeric score for {} within {} attempts",
            label,
            self.knobs.json_retries
        ))
    }

    /// Patch-list call: on decode failure, ask the oracle to repair its own
    /// JSON before giving up on the strategy.
    fn request_patch_list(&self, prompt: &str, label: &str) -> Result<Vec<PatchResponse>> {
        let mut raw = self.oracle.request(SYSTEM_MESSAGE, prompt)?;
        let mut last_err = match serde_json::from_str::<Vec<PatchResponse>>(&raw) {
            Ok(batch) => {
                self.save_interaction(prompt, &raw, label);
                return Ok(batch);
            }
            Err(e) => e.to_string(),
        };

        for _ in 0..self.knobs.json_retries {
            eprintln!("[pipeline] JSON decode error in {} response, asking for a fix", label);
            let fix_msg = FIX_JSON_MESSAGE
                .replace("<original_answer>", &raw)
                .replace("<error_msg>", &last_err);
            raw = self.oracle.request(SYSTEM_MESSAGE, &fix_msg)?;
            match serde_json::from_str::<Vec<PatchResponse>>(&raw) {
                Ok(batch) => {
                    self.save_interaction(prompt, &raw, label);
                    return Ok(batch);
                }
                Err(e) => last_err = e.to_string(),
            }
        }
        Err(anyhow!(
            "Oracle could not produce a valid patch list for {}: {}",
            label,
            last_err
        ))
    }

    fn save_interaction(&self, request: &str, response: &str, label: &str) {
        if let Err(e) = fs::create_dir_all(&self.interaction_dir) {
            eprintln!("[pipeline] Cannot create interaction dir: {}", e);
            return;
        }
        let path = self.interaction_dir.join(format!("{}.json", label));
        let record = serde_json::json!({
            "request": request,
            "response": response,
        });
        match serde_json::to_string_pretty(&record) {
            Ok(json) => {
                if let Err(e) = fs::write(&path, json) {
                    eprintln!("[pipeline] Cannot save interaction {}: {}", path.display(), e);
                }
            }
            Err(e) => eprintln!("[pipeline] Cannot encode interaction: {}", e),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Scripted oracle: pops canned responses front-to-back.
    struct FakeOracle {
        responses: RefCell<Vec<String>>,
        requests: RefCell<Vec<String>>,
    }

    impl FakeOracle {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: RefCell::new(responses.into_iter().map(String::from).collect()),
                requests: RefCell::new(Vec::new()),
            }
        }
    }

    impl Oracle for FakeOracle {
        fn request(&self, _system_msg: &str, prompt: &str) -> Result<String> {
            self.requests.borrow_mut().push(prompt.to_string());
            let mut responses = self.responses.borrow_mut();
            if responses.is_empty() {
                return Err(anyhow!("fake oracle exhausted"));
            }
            Ok(responses.remove(0))
        }
    }

    fn quick_knobs() -> PipelineConfig {
        PipelineConfig {
            max_trial: 1,
            fl_branch_num: 1,
            fl_select_num: 1,
            sr_branch_num: 1,
            sr_select_num: 1,
            max_recursion: 3,
            json_retries: 10,
        }
    }

    fn context() -> CrashContext {
        CrashContext {
            func_name: "div".to_string(),
            exception_msg: "ZeroDivisionError division by zero".to_string(),
            exception_trace: "Traceback ...".to_string(),
            target_line: "return a / b".to_string(),
            buggy_code: "def div(a, b):\n    return a / b".to_string(),
        }
    }

    const COMPREHEND_OK: &str =
        r#"{"exception_description": "div by zero", "rationale": "b is 0"}"#;
    const AGGREGATE_OK: &str = r#"{"desc": "div by zero", "rationale": "b is 0"}"#;
    const LOCATION_OK: &str = r#"{"code": "return a / b", "rationale": "crash site"}"#;
    const STRATEGY_OK: &str =
        r#"{"summary": "guard", "detailed_strategy": "check b", "rationale": "safe"}"#;
    const PATCHES_OK: &str = r#"[{"patched_code": "def div(a, b):\n    if b == 0:\n        return 0\n    return a / b", "rationale": "guard"}]"#;

    #[test]
    fn test_full_run_produces_patches() {
        let temp = TempDir::new().unwrap();
        let oracle = FakeOracle::new(vec![
            COMPREHEND_OK,
            AGGREGATE_OK,
            LOCATION_OK,
            "0.9",
            STRATEGY_OK,
            "0.8",
            PATCHES_OK,
        ]);
        let mut model = PatchModel::new(
            &oracle,
            quick_knobs(),
            Ablation::None,
            temp.path().to_path_buf(),
            context(),
        );

        model.run().unwrap();
        assert_eq!(model.patches.len(), 1);
        assert!(model.patches[0].patched_code.contains("if b == 0:"));
        // interaction dumps written for every exchange
        assert!(temp.path().join("model_interaction/comprehend_0.json").exists());
        assert!(temp.path().join("model_interaction/gen_patch_0_fb0.json").exists());
    }

    #[test]
    fn test_malformed_json_retried_then_recovered() {
        let temp = TempDir::new().unwrap();
        let oracle = FakeOracle::new(vec![
            "not json",
            "still not json",
            "nope",
            COMPREHEND_OK,
            AGGREGATE_OK,
            LOCATION_OK,
            "0.9",
            STRATEGY_OK,
            "0.8",
            PATCHES_OK,
        ]);
        let mut model = PatchModel::new(
            &oracle,
            quick_knobs(),
            Ablation::None,
            temp.path().to_path_buf(),
            context(),
        );
        model.run().unwrap();
        assert_eq!(model.patches.len(), 1);
    }

    #[test]
    fn test_json_retry_budget_bounded() {
        let temp = TempDir::new().unwrap();
        let mut knobs = quick_knobs();
        knobs.json_retries = 2;
        let oracle = FakeOracle::new(vec!["junk", "junk", "junk", "junk"]);
        let mut model = PatchModel::new(
            &oracle,
            knobs,
            Ablation::None,
            temp.path().to_path_buf(),
            context(),
        );
        assert!(model.run().is_err());
        // exactly the budget was spent on the first call
        assert_eq!(oracle.requests.borrow().len(), 2);
    }

    #[test]
    fn test_localization_keeps_top_scored() {
        let temp = TempDir::new().unwrap();
        let mut knobs = quick_knobs();
        knobs.fl_branch_num = 2;
        let oracle = FakeOracle::new(vec![
            COMPREHEND_OK,
            AGGREGATE_OK,
            r#"{"code": "weak spot", "rationale": "maybe"}"#,
            r#"{"code": "return a / b", "rationale": "crash site"}"#,
            "0.2",
            "0.9",
            STRATEGY_OK,
            "0.8",
            PATCHES_OK,
        ]);
        let mut model = PatchModel::new(
            &oracle,
            knobs,
            Ablation::None,
            temp.path().to_path_buf(),
            context(),
        );
        model.run().unwrap();
        assert_eq!(model.fault_localization.len(), 1);
        assert_eq!(model.fault_localization[0].0, "return a / b");
    }

    #[test]
    fn test_feedback_round_injects_diffs() {
        let temp = TempDir::new().unwrap();
        let oracle = FakeOracle::new(vec![
            COMPREHEND_OK,
            AGGREGATE_OK,
            LOCATION_OK,
            "0.9",
            STRATEGY_OK,
            "0.8",
            PATCHES_OK,
            // feedback round
            STRATEGY_OK,
            "0.7",
            PATCHES_OK,
        ]);
        let mut model = PatchModel::new(
            &oracle,
            quick_knobs(),
            Ablation::None,
            temp.path().to_path_buf(),
            context(),
        );
        model.run().unwrap();
        model
            .feedback_patch_gen(vec!["--- a\n+++ b\n-old\n+new".to_string()])
            .unwrap();

        let requests = oracle.requests.borrow();
        let strategy_retry = &requests[7];
        assert!(strategy_retry.contains("avoid proposing the same fix strategy"));
        assert!(strategy_retry.contains("-old"));
        assert_eq!(model.patches.len(), 1); // cleared and regenerated
    }

    #[test]
    fn test_no_feedback_ablation_skips_diffs() {
        let temp = TempDir::new().unwrap();
        let oracle = FakeOracle::new(vec![
            COMPREHEND_OK,
            AGGREGATE_OK,
            LOCATION_OK,
            "0.9",
            STRATEGY_OK,
            "0.8",
            PATCHES_OK,
            STRATEGY_OK,
            "0.7",
            PATCHES_OK,
        ]);
        let mut model = PatchModel::new(
            &oracle,
            quick_knobs(),
            Ablation::NoFeedback,
            temp.path().to_path_buf(),
            context(),
        );
        model.run().unwrap();
        model
            .feedback_patch_gen(vec!["--- a\n+++ b\n-old\n+new".to_string()])
            .unwrap();

        let requests = oracle.requests.borrow();
        assert!(requests.iter().all(|r| !r.contains("-old")));
    }

    #[test]
    fn test_single_shot_ablation() {
        let temp = TempDir::new().unwrap();
        let oracle = FakeOracle::new(vec![
            r#"{"patched_code": "def div(a, b):\n    return 0"}"#,
        ]);
        let mut model = PatchModel::new(
            &oracle,
            quick_knobs(),
            Ablation::SingleShot,
            temp.path().to_path_buf(),
            context(),
        );
        model.run().unwrap();
        assert_eq!(model.patches.len(), 1);
        assert_eq!(oracle.requests.borrow().len(), 1);
    }

    #[test]
    fn test_without_dynamic_context_omits_trace() {
        let temp = TempDir::new().unwrap();
        let oracle = FakeOracle::new(vec![
            COMPREHEND_OK,
            AGGREGATE_OK,
            LOCATION_OK,
            "0.9",
            STRATEGY_OK,
            "0.8",
            PATCHES_OK,
        ]);
        let mut model = PatchModel::new(
            &oracle,
            quick_knobs(),
            Ablation::NoDynamicContext,
            temp.path().to_path_buf(),
            context(),
        );
        model.run().unwrap();

        let requests = oracle.requests.borrow();
        // the comprehend prompt carries the code but not the live trace
        assert!(requests[0].contains("def div"));
        assert!(!requests[0].contains("Traceback ..."));
    }

    #[test]
    fn test_patch_list_fix_json_loop() {
        let temp = TempDir::new().unwrap();
        let oracle = FakeOracle::new(vec![
            COMPREHEND_OK,
            AGGREGATE_OK,
            LOCATION_OK,
            "0.9",
            STRATEGY_OK,
            "0.8",
            "broken [ json",
            PATCHES_OK, // response to the fix-your-JSON prompt
        ]);
        let mut model = PatchModel::new(
            &oracle,
            quick_knobs(),
            Ablation::None,
            temp.path().to_path_buf(),
            context(),
        );
        model.run().unwrap();
        assert_eq!(model.patches.len(), 1);

        let requests = oracle.requests.borrow();
        assert!(requests.last().unwrap().contains("fix the JSON format error"));
    }
}
