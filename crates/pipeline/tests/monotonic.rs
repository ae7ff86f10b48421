use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use vaio_core::{KnowledgeRef, MetadataStore, Stage, VaioConfig};
use vaio_llm::{Generate, ResilientClient, RetryPolicy};
use vaio_pipeline::{
    Approver, AutoApprove, DeferApproval, MediaTools, Narrator, Orchestrator, Segment, Transcript,
};
use vaio_rag::{CategoryFilter, ContextInjector, InjectionSettings, RetrievalResult, Retrieve};

struct Media;

impl MediaTools for Media {
    fn extract_audio(&self, _video: &Path, audio: &Path) -> anyhow::Result<()> {
        fs::write(audio, b"ID3")?;
        Ok(())
    }

    fn transcribe(&self, _audio: &Path, _hint: &str) -> anyhow::Result<Transcript> {
        Ok(Transcript {
            segments: vec![Segment {
                start: 0.0,
                end: 2.0,
                text: "Hello.".into(),
            }],
            language: None,
        })
    }
}

struct Voice;

impl Narrator for Voice {
    fn narrate(&self, _text: &str, _lang: &str, output: &Path) -> anyhow::Result<()> {
        fs::write(output, b"mp3")?;
        Ok(())
    }
}

struct Echo;

impl Generate for Echo {
    fn call(&self, _system: &str, _user: &str) -> anyhow::Result<String> {
        Ok("1\n00:00:00,000 --> 00:00:02,000\nHallo.".into())
    }
}

struct Nothing;

impl Retrieve for Nothing {
    fn retrieve(&self, _: &KnowledgeRef, _: &str, _: usize, _: &CategoryFilter) -> Vec<RetrievalResult> {
        Vec::new()
    }
}

fn orchestrator(dir: &Path, approver: Arc<dyn Approver>) -> Orchestrator {
    let mut config = VaioConfig::from_lookup(|key| match key {
        "TARGET_LANGS" => Some("de,fr".into()),
        "CONCURRENCY" => Some("1".into()),
        _ => None,
    })
    .unwrap();
    config.kb_root = dir.join("knowledge");
    config.data_root = dir.join("data");
    let generator = ResilientClient::new(Arc::new(Echo), RetryPolicy::new(1, Duration::ZERO));
    Orchestrator::new(
        config,
        Arc::new(generator),
        ContextInjector::new(Arc::new(Nothing), InjectionSettings::default()),
        Arc::new(Media),
        Arc::new(Voice),
        approver,
    )
}

#[derive(Debug, Clone, Copy)]
enum Op {
    ResumeApproving,
    ResumeDeferring,
    Approve,
    Step(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::ResumeApproving),
        Just(Op::ResumeDeferring),
        Just(Op::Approve),
        (1usize..8).prop_map(Op::Step),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn persisted_stage_never_regresses_without_reset(ops in prop::collection::vec(op(), 1..10)) {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        fs::write(&video, b"video").unwrap();
        let approving = orchestrator(dir.path(), Arc::new(AutoApprove));
        let deferring = orchestrator(dir.path(), Arc::new(DeferApproval));
        let store = MetadataStore::for_asset(&video);

        let mut last = store.load().stage;
        for op in ops {
            // Ordering and checkpoint errors are expected here; only the persisted stage matters.
            match op {
                Op::ResumeApproving => { let _ = approving.resume(&video); }
                Op::ResumeDeferring => { let _ = deferring.resume(&video); }
                Op::Approve => { let _ = deferring.approve(&video); }
                Op::Step(idx) => { let _ = deferring.run_stage(&video, vaio_core::ALL_STAGES[idx]); }
            }
            let now = store.load().stage;
            prop_assert!(now >= last, "{:?} moved stage from {} to {}", op, last, now);
            last = now;
        }
        prop_assert!(last <= Stage::TtsDone);
    }
}
