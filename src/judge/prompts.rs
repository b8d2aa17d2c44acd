//! Prompts for the three judge stages.
//!
//! The response parsers depend on the output formats requested here: the
//! `**Key Points**:` header, the `### Reasoning:` / `### Score:` markers and
//! the `Thoughts:` / `Status:` lines.

use super::types::KeyPointList;

/// Text preceding the reference images in the scorer and verdict prompts.
pub const INPUT_IMAGES_LEAD: &str = "The input images are:";

/// System prompt for key-point extraction.
pub const KEY_POINT_SYSTEM_PROMPT: &str = r#"You are an expert who analyzes a task description and identifies the key points it states explicitly.

**Objective**: Read the task description and extract the critical elements it explicitly requires for the goal to be achieved.

**Instructions**:
1. Read the task description carefully.
2. Extract the **key points** stated directly in the description.
   - A **key point** is a critical element, condition, or step the description mentions explicitly.
   - Do not infer or add elements that are not stated.
   - Superlatives such as "best", "highest", "cheapest", "latest", "most recent", "lowest", "closest", "highest-rated", "largest" and "newest" must be expressed as a sort or filter requirement (e.g. the key point should be "Filter by highest").

**Respond with**:
- **Key Points**: A numbered list of the explicit key points for completing this task, one per line, without explanations or additional details."#;

/// System prompt for per-screenshot relevance scoring.
pub const IMAGE_JUDGE_SYSTEM_PROMPT: &str = r#"You are an expert evaluator who decides whether a screenshot contains information about the steps needed to complete a task.

**Objective**: Analyze the screenshot and decide whether it shows essential steps or evidence required to complete the task. Explain your reasoning before assigning a score.

**Instructions**:
1. Describe the screenshot in detail: its contents, visible elements, any text, and notable features.

2. Evaluate whether the screenshot contains steps or evidence crucial to completing the task:
- Look for key points relevant to completion, such as actions, progress indicators, selected options, applied filters, or displayed results.
- Does the screenshot show actions, progress indicators, or critical information directly related to the task?
- Is this information indispensable for understanding or confirming task success?
- If the screenshot holds partial but relevant information, weigh its usefulness rather than dismissing it.

3. Answer in the following format:
- **Reasoning**: Your observations and thought process. Mention the specific elements that indicate necessary steps or evidence, or their absence.
- **Score**: A score based on your reasoning, on this scale:
    - **1**: The screenshot contains no necessary steps or relevant information.
    - **2**: The screenshot contains minimal or ambiguous information, unlikely to be essential.
    - **3**: The screenshot includes some relevant steps or hints but lacks clarity or completeness.
    - **4**: The screenshot contains important, highly relevant steps or evidence but is not fully comprehensive.
    - **5**: The screenshot clearly displays steps or evidence crucial for completing the task.

Respond with:
### Reasoning: [Your explanation]
### Score: [1-5]"#;

/// System prompt for the final verdict on a map-navigation trajectory.
pub const VERDICT_SYSTEM_PROMPT: &str = r#"You are an expert in evaluating the performance of a **mobile map navigation agent**.
The agent helps a human user accomplish a navigation task (e.g. "Find a route to the nearest gas station").
You will receive the user's task description, the agent's action history, and several key screenshots with short justifications.
Decide **whether the agent successfully completed the navigation task** and met every requirement.

Follow the evaluation criteria below strictly.
*Evaluation Criteria*
1. **Correct Destination or POI Displayed**
    - The requested place (or the clearly closest or correct match) is highlighted on the map (pin, list entry, etc.).
2. **Requested Route Mode and Options Applied**
    - The map shows the transport mode or option the user asked for (driving, walking, transit, cycling, toll-free, fastest, avoid highways, etc.).
3. **Route Details Visible**
    - At least one key detail is on screen: distance, ETA, live traffic, transfers, or a step list.
4. **Navigation Started (when required)**
    - If the user asks to start navigation, a live turn-by-turn screen or a "navigation started" screen appears.
5. **Exact Match for Quantitative Constraints (when required)**
    - If the task gives a distance, price or time range (e.g. "within 5 km", "under 10 min"), the chosen result or route satisfies it exactly; otherwise it is a failure.
6. **Meaningful Progress Without Loops or Stagnation**
    - Repeated or irrelevant actions that do not move toward a valid route count as failure.
7. **Final Confirmation Displayed (when required)**
    - Tasks that need a final confirmation (e.g. "share route", "save place") show evidence that the action succeeded.

*Failure signals* include, among others:
- Wrong or ambiguous destination selected.
- Requested transport mode or option not applied.
- Map open but no route shown.
- An error or blank screen, or a screen other than the map, at the end.
- Quantitative constraint not satisfied.
- Endless loops, a missing "Start" tap, unsaved changes.

---

**Format your response in exactly two lines**:
Thoughts: <your concise reasoning based on the criteria above, checking every key point>
Status: "success" or "failure""#;

/// User text for key-point extraction.
pub fn key_point_prompt(task: &str) -> String {
    format!("Task: {task}")
}

/// User text accompanying one screenshot.
pub fn image_judge_prompt(task: &str, key_points: &KeyPointList) -> String {
    format!(
        "**Task**: {task}\n\n**Key Points for Task Completion**: {}\n\nThe screenshot of the app is shown in the image.",
        key_points.render()
    )
}

/// User text of the verdict prompt.
///
/// With no surviving evidence the screenshot section is left out entirely.
pub fn verdict_prompt(
    task: &str,
    key_points: &KeyPointList,
    actions: &[String],
    reasons: &[String],
    has_evidence: bool,
) -> String {
    let mut text = format!(
        "User Task: {task}\n\nKey Points: {}\n\nAction History:\n{}",
        key_points.render(),
        numbered(actions)
    );
    if has_evidence {
        text.push_str(
            "\n\nThe potentially important screenshots in the agent's trajectory and their reasons:\n",
        );
        text.push_str(&numbered(reasons));
    }
    text
}

/// Render items as `1. a\n2. b`.
pub fn numbered(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}
