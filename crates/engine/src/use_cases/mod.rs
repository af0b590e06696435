//! Use cases: session orchestration across the domain and the ports.

pub mod characters;
pub mod compression;
pub mod generation;
pub mod images;

pub use characters::ProcessNewCharacters;
pub use compression::{should_compress, CompressHistory, CompressionError};
pub use generation::{
    CancelGeneration, GenerationCore, GenerationError, GenerationReport, GenerationUseCases,
    StartStory, SubmitChoice,
};
pub use images::{
    ImageQueues, ImageTaskError, ManualPortrait, ManualSceneImage, PortraitQueue, PortraitTask,
    QueueSnapshot, SceneFlag, SceneImageQueue, SceneTask, TriggerReason,
};

use taleweaver_domain::{Story, StorySegment};

/// Character budget for the windowed history tail sent to the generator.
pub const CONTEXT_TAIL_BUDGET: usize = 6_000;

/// Render one segment as prompt text.
pub(crate) fn render_segment(segment: &StorySegment) -> String {
    match segment {
        StorySegment::Narration { text } => text.clone(),
        StorySegment::Dialogue { character, text } => format!("{}: \"{}\"", character, text),
        StorySegment::Choice { text, choices, .. } => {
            if choices.is_empty() {
                format!("> {}", text)
            } else {
                format!("> {} [{}]", text, choices.join(" / "))
            }
        }
    }
}

/// Render a full segment log as prompt text.
pub(crate) fn render_history(segments: &[StorySegment]) -> String {
    segments
        .iter()
        .map(render_segment)
        .collect::<Vec<_>>()
        .join("\n")
}

/// The condensed context sent with a continuation request: the active summary
/// (if any) followed by as much of the segment tail as fits the budget.
/// Compression never deletes segments; only this window shrinks what is sent.
pub(crate) fn condensed_context(story: &Story) -> String {
    let mut tail: Vec<String> = Vec::new();
    let mut used = 0usize;
    for segment in story.segments().iter().rev() {
        let rendered = render_segment(segment);
        let len = rendered.chars().count() + 1;
        if used + len > CONTEXT_TAIL_BUDGET && !tail.is_empty() {
            break;
        }
        used += len;
        tail.push(rendered);
        if used > CONTEXT_TAIL_BUDGET {
            break;
        }
    }
    tail.reverse();
    let tail = tail.join("\n");

    match &story.story_summary {
        Some(summary) => format!("[Previously] {}\n\n{}", summary, tail),
        None => tail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::sample_story;

    #[test]
    fn test_render_segment_variants() {
        assert_eq!(
            render_segment(&StorySegment::narration("Rain fell.")),
            "Rain fell."
        );
        assert_eq!(
            render_segment(&StorySegment::dialogue("Mira", "Hello.")),
            "Mira: \"Hello.\""
        );
        assert_eq!(
            render_segment(&StorySegment::choice("Pick", vec!["A".into(), "B".into()])),
            "> Pick [A / B]"
        );
    }

    #[test]
    fn test_condensed_context_windows_tail_and_prefixes_summary() {
        let mut story = sample_story();
        let mut batch = Vec::new();
        for i in 0..100 {
            batch.push(StorySegment::narration(format!(
                "Segment {} {}",
                i,
                "x".repeat(200)
            )));
        }
        story.append_batch(batch);
        story.story_summary = Some("Earlier, the harbor burned.".to_string());

        let context = condensed_context(&story);
        assert!(context.starts_with("[Previously] Earlier, the harbor burned."));
        // The oldest segments fell out of the window.
        assert!(!context.contains("Segment 0 "));
        assert!(context.contains("Segment 99 "));
        // Budget plus at most one oversized segment and the summary prefix.
        assert!(context.chars().count() < CONTEXT_TAIL_BUDGET + 400);
    }
}
