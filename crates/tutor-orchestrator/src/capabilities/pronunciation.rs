//! Pronunciation capability: shadowing exercises and attempt scoring.
//!
//! An attempt is scored by the speech service from the submitted audio, or
//! taken as-is when the caller sends a precomputed `assessment`. The review
//! record is only updated once the exercise completes: on a passing attempt
//! or when the attempts run out.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info};
use tutor_srs::quality_from_accuracy;

use super::{publish_outcome, Context};
use crate::error::{Result, TutorError};
use crate::model::{Pillar, ReviewItem};
use crate::router::RequestType;
use crate::scheduler::{apply_practice, Practice};
use crate::services::{ExerciseRequest, PronunciationAssessment};
use crate::state::{ActivityOutput, InteractionState};

const AGENT: &str = "pronunciation";

/// Accuracy needed to pass an attempt.
pub const MIN_PASSING_ACCURACY: f64 = 70.0;

/// Mean accuracy at which a sound counts as mastered.
pub const MASTERY_ACCURACY: f64 = 85.0;

/// Attempts allowed per exercise.
pub const MAX_ATTEMPTS: u32 = 3;

/// A built-in sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StarterSound {
    /// Stable sound identifier.
    pub id: &'static str,
    /// IPA symbol.
    pub phoneme: &'static str,
    /// Articulation tip.
    pub tip: &'static str,
    /// Practice words containing the sound.
    pub words: &'static [&'static str],
}

/// Built-in sounds, hardest for Portuguese speakers first.
pub const STARTER_SOUNDS: &[StarterSound] = &[
    StarterSound {
        id: "th_voiceless",
        phoneme: "θ",
        tip: "Put the tip of your tongue between your teeth and blow air gently.",
        words: &["think", "three", "birthday", "math"],
    },
    StarterSound {
        id: "th_voiced",
        phoneme: "ð",
        tip: "Tongue between the teeth as for 'think', but use your voice.",
        words: &["this", "mother", "weather", "breathe"],
    },
    StarterSound {
        id: "short_i",
        phoneme: "ɪ",
        tip: "Keep it short and relaxed; do not stretch it into 'ee'.",
        words: &["ship", "live", "sit", "bit"],
    },
    StarterSound {
        id: "h_initial",
        phoneme: "h",
        tip: "A soft breath from the throat, not the Portuguese 'rr'.",
        words: &["house", "happy", "hello", "hospital"],
    },
    StarterSound {
        id: "schwa",
        phoneme: "ə",
        tip: "A short, weak, relaxed sound in unstressed syllables.",
        words: &["about", "banana", "problem", "support"],
    },
];

/// Looks up a built-in sound by identifier.
#[must_use]
pub fn starter_sound(id: &str) -> Option<&'static StarterSound> {
    STARTER_SOUNDS.iter().find(|s| s.id == id)
}

/// Mastery label for a sound's review record.
#[must_use]
pub fn sound_mastery(item: &ReviewItem) -> &'static str {
    if item.practice_count == 0 {
        "not_started"
    } else if item.accuracy >= MASTERY_ACCURACY && item.practice_count >= 3 {
        "mastered"
    } else if item.accuracy >= MIN_PASSING_ACCURACY {
        "practicing"
    } else {
        "needs_work"
    }
}

fn fallback_exercise(sound: &StarterSound, word: &str) -> Value {
    json!({
        "type": "shadowing",
        "phoneme": sound.phoneme,
        "word": word,
        "sentence": format!("Please say '{word}' clearly."),
        "instructions": format!(
            "Listen and repeat the word, focusing on the /{}/ sound. Tip: {}",
            sound.phoneme, sound.tip
        ),
    })
}

/// Runs the pronunciation node.
pub async fn run(state: &mut InteractionState, ctx: &Context) -> Result<()> {
    let shadowing = state.request_type.parse::<RequestType>().ok() == Some(RequestType::Shadowing);
    let submitted = state.activity_input.get("audio_base64").is_some()
        || state.activity_input.get("assessment").is_some();
    if shadowing || submitted {
        score_attempt(state, ctx).await
    } else {
        serve_exercise(state, ctx).await
    }
}

async fn select_sound(
    state: &InteractionState,
    ctx: &Context,
) -> Result<Option<&'static StarterSound>> {
    if let Some(id) = state.input_str("sound_id") {
        return starter_sound(id)
            .map(Some)
            .ok_or_else(|| TutorError::not_found("sound", id));
    }

    let learner_id = &state.learner.learner_id;
    let due = ctx
        .store
        .due_items(learner_id, Pillar::Pronunciation, Utc::now())
        .await?;
    if let Some(sound) = due.iter().find_map(|item| starter_sound(&item.item_id)) {
        return Ok(Some(sound));
    }

    let known = ctx
        .store
        .list_review_items(learner_id, Pillar::Pronunciation)
        .await?;
    let weak = known
        .iter()
        .filter(|k| k.accuracy < MIN_PASSING_ACCURACY)
        .min_by(|a, b| a.accuracy.total_cmp(&b.accuracy))
        .and_then(|k| starter_sound(&k.item_id));
    if weak.is_some() {
        return Ok(weak);
    }
    Ok(STARTER_SOUNDS
        .iter()
        .find(|s| !known.iter().any(|k| k.item_id == s.id)))
}

async fn serve_exercise(state: &mut InteractionState, ctx: &Context) -> Result<()> {
    let Some(sound) = select_sound(state, ctx).await? else {
        state.reset_response("pronunciation_exercise", "no_sounds");
        state.respond(
            "message",
            "Every available sound has been practiced. Well done!",
        );
        state.add_message(AGENT, "No sounds left to practice");
        return Ok(());
    };

    let word = state
        .input_str("word")
        .map(ToString::to_string)
        .or_else(|| sound.words.first().map(|w| (*w).to_string()))
        .unwrap_or_else(|| "example".to_string());

    let request = ExerciseRequest {
        pillar: Pillar::Pronunciation,
        kind: "shadowing".to_string(),
        level: state.learner.level,
        focus: sound.phoneme.to_string(),
        context: word.clone(),
    };
    let (exercise, fallback) = ctx
        .exercise_or(&request, || fallback_exercise(sound, &word))
        .await;

    state.current_activity = Some(json!({
        "pillar": "pronunciation",
        "sound_id": sound.id,
        "word": word,
    }));
    state.reset_response("pronunciation_exercise", "success");
    state.respond("sound_id", sound.id);
    state.respond("phoneme", sound.phoneme);
    state.respond("word", word.as_str());
    state.respond("tip", sound.tip);
    state.respond("exercise", exercise);
    state.respond("attempts_allowed", MAX_ATTEMPTS);
    state.respond("fallback_content", fallback);
    state.add_message(
        AGENT,
        format!(
            "Generated shadowing exercise for /{}/: {word}",
            sound.phoneme
        ),
    );
    Ok(())
}

async fn assess(
    state: &InteractionState,
    ctx: &Context,
    reference: &str,
) -> Result<PronunciationAssessment> {
    if let Some(precomputed) = state.activity_input.get("assessment") {
        return serde_json::from_value(precomputed.clone())
            .map_err(|e| TutorError::invalid_input(format!("malformed assessment: {e}")));
    }
    let audio = state
        .input_str("audio_base64")
        .filter(|a| !a.is_empty())
        .ok_or_else(|| TutorError::invalid_input("no audio provided; record your pronunciation"))?;
    ctx.speech.assess_pronunciation(reference, audio).await
}

async fn score_attempt(state: &mut InteractionState, ctx: &Context) -> Result<()> {
    let sound_id = state
        .input_str("sound_id")
        .map(ToString::to_string)
        .ok_or_else(|| TutorError::invalid_input("shadowing requires 'sound_id'"))?;
    let word = state.input_str("word").map(ToString::to_string);
    let reference = state
        .input_str("reference_text")
        .map(ToString::to_string)
        .or_else(|| word.clone())
        .ok_or_else(|| TutorError::invalid_input("shadowing requires 'word' or 'reference_text'"))?;

    let assessment = assess(state, ctx, &reference).await?;
    let accuracy = assessment.accuracy.clamp(0.0, 100.0);
    let attempt = state
        .input_u64("attempt_number")
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(1)
        .max(1);
    let best = state
        .input_f64("best_accuracy")
        .map_or(accuracy, |b| b.max(accuracy));

    let passed = accuracy >= MIN_PASSING_ACCURACY;
    let attempts_remaining = MAX_ATTEMPTS.saturating_sub(attempt);
    let complete = passed || attempts_remaining == 0;
    let quality = quality_from_accuracy(best);
    let sound = starter_sound(&sound_id);

    state.reset_response("shadowing_result", "success");
    state.respond("sound_id", sound_id.as_str());
    state.respond("word", word.clone().map_or(Value::Null, Value::from));
    state.respond("reference_text", reference.as_str());
    state.respond("recognized_text", assessment.recognized_text.clone());
    state.respond(
        "scores",
        json!({"accuracy": accuracy, "fluency": assessment.fluency, "best_accuracy": best}),
    );
    state.respond("words_detail", serde_json::to_value(&assessment.words)?);
    state.respond("passed", passed);
    state.respond("attempt_number", attempt);
    state.respond("attempts_remaining", attempts_remaining);
    state.respond("exercise_complete", complete);

    let problems = assessment.problem_words(MIN_PASSING_ACCURACY);
    if !passed && !problems.is_empty() {
        if let Some(sound) = sound {
            state.respond(
                "phoneme_guidance",
                json!({"target_phoneme": sound.phoneme, "tip": sound.tip}),
            );
        }
    }

    if complete {
        let text = sound.map_or(sound_id.as_str(), |s| s.phoneme);
        let item = apply_practice(
            ctx.store.as_ref(),
            &ctx.config.srs,
            Practice {
                learner_id: &state.learner.learner_id,
                item_id: &sound_id,
                pillar: Pillar::Pronunciation,
                text,
                quality,
                accuracy: best,
            },
            Utc::now(),
        )
        .await?;
        state.respond("mastery_level", sound_mastery(&item));
        state.respond("next_review_days", item.srs.interval_days);

        let mut output = ActivityOutput::new(Pillar::Pronunciation, passed, quality);
        output.item_id = Some(sound_id.clone());
        output.accuracy = Some(best);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let score = best.round() as u32;
        output.score = Some(score);
        output.errors = assessment.learner_errors(MIN_PASSING_ACCURACY);
        publish_outcome(state, output);
        info!(sound_id = %sound_id, accuracy = best, quality, "Shadowing exercise complete");
    } else {
        debug!(sound_id = %sound_id, attempt, accuracy, "Shadowing attempt below passing");
    }

    state.add_message(
        AGENT,
        format!(
            "Assessed pronunciation for '{reference}': accuracy={accuracy:.1}%, passed={passed}"
        ),
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::capabilities::testing::{context, state};
    use crate::services::{PhonemeScore, SpeechService, WordScore};
    use crate::store::Persistence;

    struct FixedSpeech(f64);

    #[async_trait]
    impl SpeechService for FixedSpeech {
        async fn assess_pronunciation(
            &self,
            reference_text: &str,
            _audio: &str,
        ) -> Result<PronunciationAssessment> {
            Ok(PronunciationAssessment {
                accuracy: self.0,
                fluency: Some(80.0),
                recognized_text: Some(reference_text.to_string()),
                words: vec![WordScore {
                    word: reference_text.to_string(),
                    accuracy: self.0,
                    phonemes: vec![PhonemeScore {
                        phoneme: "θ".to_string(),
                        accuracy: self.0 - 10.0,
                    }],
                }],
            })
        }
    }

    #[test]
    fn test_sound_mastery_labels() {
        let now = Utc::now();
        let mut item = ReviewItem::new(
            "ana",
            "th_voiceless",
            Pillar::Pronunciation,
            &tutor_srs::SrsConfig::default(),
            now,
        );
        assert_eq!(sound_mastery(&item), "not_started");
        item.practice_count = 3;
        item.accuracy = 90.0;
        assert_eq!(sound_mastery(&item), "mastered");
        item.practice_count = 2;
        assert_eq!(sound_mastery(&item), "practicing");
        item.accuracy = 40.0;
        assert_eq!(sound_mastery(&item), "needs_work");
    }

    #[tokio::test]
    async fn test_exercise_for_first_unpracticed_sound() {
        let (ctx, _store) = context();
        let mut state = state("pronunciation_exercise", json!({}));
        run(&mut state, &ctx).await.unwrap();

        assert_eq!(state.response["type"], "pronunciation_exercise");
        assert_eq!(state.response["sound_id"], "th_voiceless");
        assert_eq!(state.response["word"], "think");
        assert_eq!(
            state.response["exercise"]["sentence"],
            "Please say 'think' clearly."
        );
        assert_eq!(state.response["attempts_allowed"], 3);
    }

    #[tokio::test]
    async fn test_exercise_prefers_weak_sound() {
        let (ctx, store) = context();
        let now = Utc::now();
        let mut item = ReviewItem::new("ana", "schwa", Pillar::Pronunciation, &ctx.config.srs, now);
        item.srs.next_due = now + chrono::Duration::days(3);
        item.accuracy = 40.0;
        item.practice_count = 1;
        store.put_review_item(&item).await.unwrap();

        let mut state = state("pronunciation_exercise", json!({}));
        run(&mut state, &ctx).await.unwrap();
        assert_eq!(state.response["sound_id"], "schwa");
    }

    #[tokio::test]
    async fn test_passing_attempt_via_speech_service() {
        let (ctx, store) = context();
        let ctx = ctx.with_speech(Arc::new(FixedSpeech(92.0)));
        let mut state = state(
            "shadowing",
            json!({"sound_id": "th_voiceless", "word": "three", "audio_base64": "UklGRg=="}),
        );
        run(&mut state, &ctx).await.unwrap();

        assert_eq!(state.response["type"], "shadowing_result");
        assert_eq!(state.response["passed"], true);
        assert_eq!(state.response["exercise_complete"], true);
        assert_eq!(state.response["recognized_text"], "three");
        let output = state.activity_output.as_ref().unwrap();
        assert_eq!(output.quality, 4);
        assert_eq!(output.score, Some(92));
        assert!(output.errors.is_empty());
        let item = store
            .get_review_item("ana", "th_voiceless")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.text, "θ");
    }

    #[tokio::test]
    async fn test_failed_attempt_with_attempts_left_records_nothing() {
        let (ctx, store) = context();
        let ctx = ctx.with_speech(Arc::new(FixedSpeech(50.0)));
        let mut state = state(
            "shadowing",
            json!({
                "sound_id": "th_voiceless",
                "word": "three",
                "audio_base64": "UklGRg==",
                "attempt_number": 1,
            }),
        );
        run(&mut state, &ctx).await.unwrap();

        assert_eq!(state.response["passed"], false);
        assert_eq!(state.response["attempts_remaining"], 2);
        assert_eq!(state.response["phoneme_guidance"]["target_phoneme"], "θ");
        assert!(state.activity_output.is_none());
        let item = store.get_review_item("ana", "th_voiceless").await.unwrap();
        assert!(item.is_none());
    }

    #[tokio::test]
    async fn test_last_failed_attempt_publishes_errors() {
        let (ctx, _store) = context();
        let mut state = state(
            "pronunciation_exercise",
            json!({
                "sound_id": "th_voiceless",
                "word": "three",
                "attempt_number": 3,
                "best_accuracy": 60.0,
                "assessment": {
                    "accuracy": 45.0,
                    "words": [{
                        "word": "three",
                        "accuracy": 45.0,
                        "phonemes": [{"phoneme": "θ", "accuracy": 20.0}]
                    }]
                }
            }),
        );
        run(&mut state, &ctx).await.unwrap();

        assert_eq!(state.response["exercise_complete"], true);
        let output = state.activity_output.as_ref().unwrap();
        assert!(!output.correct);
        assert_eq!(output.accuracy, Some(60.0));
        assert_eq!(output.quality, 2);
        assert!(state.errors.has_errors);
        assert_eq!(state.errors.pending_errors.len(), 1);
    }

    #[tokio::test]
    async fn test_offline_speech_is_an_error() {
        let (ctx, _store) = context();
        let mut state = state(
            "shadowing",
            json!({"sound_id": "th_voiceless", "word": "three", "audio_base64": "UklGRg=="}),
        );
        let err = run(&mut state, &ctx).await.unwrap_err();
        assert!(matches!(err, TutorError::CollaboratorUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_missing_audio_is_invalid() {
        let (ctx, _store) = context();
        let mut state = state(
            "shadowing",
            json!({"sound_id": "th_voiceless", "word": "three"}),
        );
        let err = run(&mut state, &ctx).await.unwrap_err();
        assert!(matches!(err, TutorError::InvalidInput { .. }));
    }
}
