//! End-to-end library tests: ingest → retrieve → generate → save, with a
//! fake vision model and a scripted language model in place of network
//! providers.

use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use patent_harness::claims::ClaimsStore;
use patent_harness::config::parse_config;
use patent_harness::db::connect_in_memory;
use patent_harness::drafting;
use patent_harness::embedding::{EmbeddingProvider, HashProvider};
use patent_harness::extract::{extract_units, DocumentKind, ImageDescriber};
use patent_harness::index::{IndexClient, MemoryIndex};
use patent_harness::ingest::{ingest_uploads, Slot, Upload};
use patent_harness::llm::{LanguageModel, Prompt};
use patent_harness::memory::ConversationStore;
use patent_harness::models::ContentKind;
use patent_harness::sections::{ContextCap, SectionKey, SectionStore, SectionType};
use patent_harness::session::Session;

struct FakeVision;

#[async_trait]
impl ImageDescriber for FakeVision {
    async fn describe(&self, image: &[u8], media_type: &str, _instruction: &str) -> anyhow::Result<String> {
        Ok(format!(
            "Block diagram of the coil driver ({} bytes, {})",
            image.len(),
            media_type
        ))
    }
}

struct Scripted {
    prompts: Mutex<Vec<Prompt>>,
    reply: String,
}

#[async_trait]
impl LanguageModel for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, prompt: &Prompt) -> anyhow::Result<String> {
        self.prompts.lock().unwrap().push(prompt.clone());
        Ok(self.reply.clone())
    }
}

fn zip_parts(parts: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, data) in parts {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

fn slide(text: &str) -> Vec<u8> {
    format!(
        "<p:sld xmlns:p=\"p\" xmlns:a=\"a\"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>",
        text
    )
    .into_bytes()
}

/// Three slides; slide 2 carries one PNG picture.
fn deck() -> Vec<u8> {
    let rels = br#"<Relationships><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="../media/image1.png"/></Relationships>"#;
    zip_parts(&[
        ("ppt/slides/slide1.xml", slide("Problem: charging pads overheat under sustained load")),
        ("ppt/slides/slide2.xml", slide("Solution: resonant coil with temperature feedback controller")),
        ("ppt/slides/slide3.xml", slide("Results: thirty percent lower surface temperature")),
        ("ppt/slides/_rels/slide2.xml.rels", rels.to_vec()),
        ("ppt/media/image1.png", b"\x89PNG\r\n\x1a\nfake".to_vec()),
    ])
}

fn claims_docx() -> Vec<u8> {
    let paragraphs = [
        "WIRELESS CHARGING PAD WITH THERMAL FEEDBACK",
        "What is claimed is:",
        "1. A charging pad comprising a resonant coil and a controller that reduces power when the coil exceeds a threshold temperature.",
        "2. The charging pad of claim 1, wherein the threshold is 45 degrees Celsius.",
    ];
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!("<w:document xmlns:w=\"w\"><w:body>{}</w:body></w:document>", body);
    zip_parts(&[("word/document.xml", xml.into_bytes())])
}

/// Hash embeddings that can be switched off to simulate a provider outage.
struct Flaky {
    inner: HashProvider,
    down: AtomicBool,
}

#[async_trait]
impl EmbeddingProvider for Flaky {
    fn model_name(&self) -> &str {
        "flaky"
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if self.down.load(Ordering::SeqCst) {
            anyhow::bail!("embedding service unavailable (429)");
        }
        self.inner.embed(texts).await
    }
}

async fn session(model: Arc<dyn LanguageModel>) -> Session {
    session_with(model, Arc::new(HashProvider::new(256))).await
}

async fn session_with(model: Arc<dyn LanguageModel>, embedder: Arc<dyn EmbeddingProvider>) -> Session {
    let config = parse_config(
        "[db]\ndir = \"unused\"\n[embedding]\nprovider = \"hash\"\n[retrieval]\ntop_k = 2\n",
    )
    .unwrap();
    let index = Arc::new(IndexClient::new(embedder, Arc::new(MemoryIndex::new()), 8));
    let sections = SectionStore::open(connect_in_memory().await.unwrap(), 30)
        .await
        .unwrap();
    let claims = ClaimsStore::open(connect_in_memory().await.unwrap())
        .await
        .unwrap();
    let conversations = ConversationStore::open(connect_in_memory().await.unwrap())
        .await
        .unwrap();
    Session::from_parts(
        config,
        sections,
        claims,
        index,
        model,
        conversations,
        Some(Arc::new(FakeVision) as Arc<dyn ImageDescriber>),
    )
    .unwrap()
}

fn write(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

#[tokio::test]
async fn test_pptx_slides_and_picture_description() {
    let units = extract_units("deck.pptx", &deck(), DocumentKind::Pptx, Some(&FakeVision as &dyn ImageDescriber))
        .await
        .unwrap();

    let slides: Vec<_> = units.iter().filter(|u| u.kind == ContentKind::Slide).collect();
    assert_eq!(slides.len(), 3);
    assert_eq!(
        slides.iter().map(|u| u.location).collect::<Vec<_>>(),
        vec![Some(1), Some(2), Some(3)]
    );

    let pictures: Vec<_> = units
        .iter()
        .filter(|u| u.kind == ContentKind::ImageDescription)
        .collect();
    assert_eq!(pictures.len(), 1);
    assert_eq!(pictures[0].location, Some(2));
    assert!(pictures[0].text.contains("image/png"));
}

#[tokio::test]
async fn test_ingest_then_retrieve_slide_two() {
    let dir = TempDir::new().unwrap();
    let deck = write(&dir, "deck.pptx", &deck());
    let model = Arc::new(Scripted {
        prompts: Mutex::new(Vec::new()),
        reply: "ok".into(),
    });
    let session = session(model).await;

    let report = ingest_uploads(&session, &[Upload::new(Slot::Supplementary, &deck)], false)
        .await
        .unwrap();
    assert_eq!(report.failed(), 0);
    assert_eq!(report.files[0].units, 4);
    assert_eq!(report.files[0].images, 1);
    assert!(report.general_namespace.is_some());

    let results = session
        .general_retriever()
        .await
        .unwrap()
        .retrieve("resonant coil temperature feedback controller")
        .await
        .unwrap();
    assert_eq!(results[0].chunk.location, Some(2));
    assert_eq!(results[0].chunk.kind, ContentKind::Slide);
}

#[tokio::test]
async fn test_reingest_starts_fresh_namespace() {
    let dir = TempDir::new().unwrap();
    let first = write(&dir, "first.txt", b"Graphene heat spreaders line the pad housing.");
    let second = write(&dir, "second.txt", b"Ferrite shielding sits beneath the coil.");
    let model = Arc::new(Scripted {
        prompts: Mutex::new(Vec::new()),
        reply: "ok".into(),
    });
    let session = session(model).await;

    let a = ingest_uploads(&session, &[Upload::new(Slot::Primary, &first)], false)
        .await
        .unwrap();
    let b = ingest_uploads(&session, &[Upload::new(Slot::Primary, &second)], false)
        .await
        .unwrap();
    assert_ne!(a.general_namespace, b.general_namespace);

    let results = session
        .general_retriever()
        .await
        .unwrap()
        .retrieve("graphene heat spreaders")
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.chunk.source == "second.txt"));

    let c = ingest_uploads(&session, &[Upload::new(Slot::Primary, &first)], true)
        .await
        .unwrap();
    assert_eq!(b.general_namespace, c.general_namespace);

    ingest_uploads(&session, &[Upload::new(Slot::Primary, &first)], true)
        .await
        .unwrap();
    let results = session
        .general_retriever()
        .await
        .unwrap()
        .retrieve("graphene heat spreaders")
        .await
        .unwrap();
    assert_eq!(
        results.iter().filter(|r| r.chunk.source == "first.txt").count(),
        1
    );
}

#[tokio::test]
async fn test_failed_reingest_keeps_previous_documents_and_claims() {
    let dir = TempDir::new().unwrap();
    let first = write(&dir, "a.txt", b"Graphene heat spreaders line the pad housing.");
    let claims = write(&dir, "claims.docx", &claims_docx());
    let second = write(&dir, "b.txt", b"Ferrite shielding sits beneath the coil.");
    let no_claims = write(&dir, "draft.txt", b"Notes without any claims section.");
    let embedder = Arc::new(Flaky {
        inner: HashProvider::new(256),
        down: AtomicBool::new(false),
    });
    let model = Arc::new(Scripted {
        prompts: Mutex::new(Vec::new()),
        reply: "ok".into(),
    });
    let session = session_with(model, embedder.clone()).await;

    let a = ingest_uploads(
        &session,
        &[
            Upload::new(Slot::Primary, &first),
            Upload::new(Slot::Claims, &claims),
        ],
        false,
    )
    .await
    .unwrap();

    embedder.down.store(true, Ordering::SeqCst);
    let failed = ingest_uploads(
        &session,
        &[
            Upload::new(Slot::Primary, &second),
            Upload::new(Slot::Claims, &no_claims),
        ],
        false,
    )
    .await;
    assert!(failed.is_err());
    embedder.down.store(false, Ordering::SeqCst);

    let retriever = session.general_retriever().await.unwrap();
    assert_eq!(
        retriever.namespace().map(|n| n.to_string()),
        a.general_namespace
    );
    let results = retriever.retrieve("graphene heat spreaders").await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.source, "a.txt");
    assert_eq!(session.claims.claims().await.unwrap().len(), 2);
    assert!(session.claims_retriever().await.unwrap().namespace().is_some());
}

#[tokio::test]
async fn test_claims_slot_feeds_summary_generation() {
    let dir = TempDir::new().unwrap();
    let deck = write(&dir, "deck.pptx", &deck());
    let claims = write(&dir, "claims.docx", &claims_docx());
    let model = Arc::new(Scripted {
        prompts: Mutex::new(Vec::new()),
        reply: "A charging pad regulates coil power from a temperature feedback signal.\n\n\
                The controller reduces output above a threshold so the surface stays cool."
            .into(),
    });
    let session = session(model.clone()).await;

    let report = ingest_uploads(
        &session,
        &[
            Upload::new(Slot::Primary, &deck),
            Upload::new(Slot::Claims, &claims),
        ],
        false,
    )
    .await
    .unwrap();
    assert_eq!(report.title.as_deref(), Some("WIRELESS CHARGING PAD WITH THERMAL FEEDBACK"));
    assert_eq!(report.claims_found, 2);
    assert!(report.claims_namespace.is_some());

    let claim_hits = session
        .claims_retriever()
        .await
        .unwrap()
        .retrieve("threshold temperature")
        .await
        .unwrap();
    assert!(claim_hits.iter().all(|r| r.chunk.source == "claims.docx"));

    let summary = SectionKey::Fixed(SectionType::Summary);
    assert!(drafting::generate(&session, &summary, "").await.is_err());

    drafting::save(
        &session,
        &SectionKey::Fixed(SectionType::Background),
        None,
        "Charging pads for handheld devices heat up during sustained charging sessions.",
    )
    .await
    .unwrap();

    let draft = drafting::generate(&session, &summary, "thermal feedback")
        .await
        .unwrap();
    assert!(!draft.sources.is_empty());

    let prompts = model.prompts.lock().unwrap().clone();
    let generation = prompts
        .iter()
        .find(|p| {
            p.system
                .as_deref()
                .is_some_and(|s| s.contains("GENERATION INSTRUCTIONS"))
        })
        .expect("generation prompt recorded");
    let system = generation.system.as_deref().unwrap();
    assert!(system.contains("WIRELESS CHARGING PAD WITH THERMAL FEEDBACK"));
    assert!(system.contains("Claim 1: 1. A charging pad"));
    assert!(system.contains("Charging pads for handheld devices"));
    assert!(generation
        .last_user_text()
        .unwrap()
        .contains("thermal feedback"));

    let turns = session
        .memory
        .store()
        .all(session.memory.namespace())
        .await
        .unwrap();
    assert!(turns
        .iter()
        .any(|t| t.prompt == "Generate summary section: thermal feedback"));

    drafting::save(&session, &summary, Some("thermal feedback"), &draft.text)
        .await
        .unwrap();
    let record = session.sections.get(&summary).await.unwrap().unwrap();
    assert_eq!(
        record.paragraphs.iter().map(|p| p.number).collect::<Vec<_>>(),
        vec![2, 3]
    );

    let context = session
        .sections
        .get_context(&ContextCap::unbounded())
        .await
        .unwrap();
    assert!(context.find("BACKGROUND").unwrap() < context.find("SUMMARY").unwrap());
    assert!(context.contains("[3] The controller reduces output"));
}
