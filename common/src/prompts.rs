//! プロンプト生成モジュール
//!
//! 試験レビュー（「この試験は患者にとって検討に値するか」）用の
//! システムプロンプトとユーザープロンプトを生成する。

/// システムプロンプト（腫瘍内科医ペルソナ）
pub const REVIEW_SYSTEM_PROMPT: &str = "\
You are a brilliant oncologist with encyclopedic knowledge about cancer and its treatment. \
Your job is to evaluate whether a given clinical trial is a reasonable consideration for a \
patient, given a clinical trial summary and a patient summary.";

/// 回答トークン（肯定）
pub const YES_TOKEN: &str = "Yes!";

/// 回答トークン（否定）
pub const NO_TOKEN: &str = "No!";

/// レビュー用ユーザープロンプト生成
///
/// # Arguments
/// * `trial_summary` - 試験サマリ
/// * `patient_summary` - 患者の記述
///
/// # Returns
/// 段階的に推論した上で `Yes!` / `No!` の一語で答えるよう求めるプロンプト
pub fn build_review_prompt(trial_summary: &str, patient_summary: &str) -> String {
    format!(
        r#"Here is a summary of the clinical trial:
 {trial_summary}.
Here is a summary of the patient:
{patient_summary}
Base your judgment on whether the patient generally fits the cancer type(s), prior treatment(s), and biomarker criteria specified for the trial.
You do not have to determine if the patient is actually eligible; instead please just evaluate whether it is reasonable for the trial to be considered further by the patient's oncologist.
Some trials have biomarker requirements that are not assessed until formal eligibility screening begins; please ignore these requirements.
Reason step by step, then answer the question "Is this trial a reasonable consideration for this patient?" with a one-word {YES_TOKEN} or {NO_TOKEN} answer."#
    )
}
