use std::cell::RefCell;
use std::collections::VecDeque;

use lopdf::content::{Content, Operation};
use lopdf::{Document as PdfDocument, Object, ObjectId, Stream, dictionary};

use crate::document::{Document, TextBackend};
use crate::error::ModelError;
use crate::extraction::{DocumentUpload, GenerativeModel, ModelResponse, PDF_MIME_TYPE};
use crate::model::ExtractionPath;

/// Builds an in-memory PDF with one text line per page.
pub(crate) fn pdf_with_pages(page_texts: &[&str]) -> Vec<u8> {
    let mut doc = PdfDocument::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in page_texts {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![50.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let encoded = content.encode().expect("content should encode");
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => page_texts.len() as i64,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("pdf should serialize");
    bytes
}

pub(crate) fn document_with_pages(page_texts: &[&str]) -> Document {
    Document::from_bytes("fixture", pdf_with_pages(page_texts), TextBackend::Lopdf)
        .expect("fixture pdf should load")
}

/// Raw content stream bytes of every page, in page order.
pub(crate) fn page_contents(bytes: &[u8]) -> Vec<Vec<u8>> {
    let doc = PdfDocument::load_mem(bytes).expect("pdf should load");
    doc.get_pages()
        .values()
        .map(|page_id: &ObjectId| {
            doc.get_page_content(*page_id)
                .expect("page content should decode")
        })
        .collect()
}

pub(crate) type Scripted = Result<ModelResponse, ModelError>;

/// Replays queued answers per path and records every call it receives.
///
/// Once a queue is empty the path answers with `repeat`, or fails with
/// `EmptyResponse` when no repeat answer is set.
pub(crate) struct ScriptedModel {
    native: RefCell<VecDeque<Scripted>>,
    text: RefCell<VecDeque<Scripted>>,
    repeat: Option<String>,
    pub(crate) calls: RefCell<Vec<(ExtractionPath, String)>>,
}

impl ScriptedModel {
    pub(crate) fn new(native: Vec<Scripted>, text: Vec<Scripted>) -> Self {
        Self {
            native: RefCell::new(native.into()),
            text: RefCell::new(text.into()),
            repeat: None,
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Answers every native call with the same text.
    pub(crate) fn answering(text: &str) -> Self {
        Self {
            repeat: Some(text.to_string()),
            ..Self::new(Vec::new(), Vec::new())
        }
    }

    pub(crate) fn calls_on(&self, path: ExtractionPath) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|(called, _)| *called == path)
            .count()
    }

    fn next(&self, path: ExtractionPath, prompt: &str) -> Scripted {
        self.calls.borrow_mut().push((path, prompt.to_string()));
        let queue = match path {
            ExtractionPath::NativeDocument => &self.native,
            ExtractionPath::TextFallback => &self.text,
        };
        match queue.borrow_mut().pop_front() {
            Some(answer) => answer,
            None => match (&self.repeat, path) {
                (Some(text), ExtractionPath::NativeDocument) => answer(text),
                _ => Err(ModelError::EmptyResponse),
            },
        }
    }
}

impl GenerativeModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "gemini-2.5-flash"
    }

    fn generate_from_document(
        &self,
        prompt: &str,
        document: DocumentUpload<'_>,
    ) -> Result<ModelResponse, ModelError> {
        assert_eq!(document.mime_type, PDF_MIME_TYPE);
        self.next(ExtractionPath::NativeDocument, prompt)
    }

    fn generate_from_text(&self, prompt: &str) -> Result<ModelResponse, ModelError> {
        self.next(ExtractionPath::TextFallback, prompt)
    }
}

pub(crate) fn answer(text: &str) -> Scripted {
    Ok(ModelResponse {
        text: text.to_string(),
        prompt_tokens: 1_000_000,
        completion_tokens: 100_000,
    })
}
