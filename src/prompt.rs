use anyhow::Context;

use crate::record::FrameBatch;

const FENCE_OPEN: &str = "```json\n";
const FENCE_CLOSE: &str = "\n```";

const PREAMBLE: &str = "\
You are an assistant that describes videos using only what can be seen in them. \
Below is a chronological sequence of observations taken from frames sampled at a \
fixed interval. Turn them into one coherent narrative of the video.

Guidelines:
1. Read the JSON carefully. Each entry has a `timestamp`, a `caption` produced by an \
image captioning model, and `ocr_text` holding any on-screen text found in that frame.
2. Synthesize rather than list. Merge related observations across frames into \
flowing prose; do not repeat the captions one by one.
3. Describe visuals only. Never infer sound, music, or speech, and do not speculate \
beyond what the captions support.
4. Call out key moments: scene changes, objects that appear or disappear, and how \
actions progress.
5. Keep the narrative in chronological order.
6. Where `ocr_text` is non-empty, work that text naturally into the description.
7. Be concise. Around 3 to 5 sentences suits simple footage; use more only when the \
content is genuinely complex.
8. If little changes, describe the dominant steady-state scene instead of inventing \
motion.

Visual observations:

";

const CLOSING: &str = "\n\nWrite the description of the video now.\n";

/// Wraps the batch, serialized as indented JSON, in the narrative instructions.
pub fn build_prompt(batch: &FrameBatch) -> anyhow::Result<String> {
    let document =
        serde_json::to_string_pretty(batch).context("failed to serialize frame records")?;
    Ok(format!(
        "{PREAMBLE}{FENCE_OPEN}{document}{FENCE_CLOSE}{CLOSING}"
    ))
}

/// Recovers the frame records embedded in a prompt from [`build_prompt`].
pub fn parse_frame_document(prompt: &str) -> anyhow::Result<FrameBatch> {
    let start = prompt
        .find(FENCE_OPEN)
        .context("prompt has no JSON document")?
        + FENCE_OPEN.len();
    let len = prompt[start..]
        .find(FENCE_CLOSE)
        .context("JSON document is not terminated")?;
    serde_json::from_str(&prompt[start..start + len]).context("malformed frame document")
}
