use crate::error::ModelError;

pub const PDF_MIME_TYPE: &str = "application/pdf";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelResponse {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct DocumentUpload<'a> {
    pub display_name: &'a str,
    pub mime_type: &'a str,
    pub bytes: &'a [u8],
}

/// A generative model that can read either a whole document or plain text.
///
/// Implementations must not keep per-document state between calls.
pub trait GenerativeModel {
    fn model_name(&self) -> &str;

    fn generate_from_document(
        &self,
        prompt: &str,
        document: DocumentUpload<'_>,
    ) -> Result<ModelResponse, ModelError>;

    fn generate_from_text(&self, prompt: &str) -> Result<ModelResponse, ModelError>;
}

impl<M: GenerativeModel + ?Sized> GenerativeModel for &M {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn generate_from_document(
        &self,
        prompt: &str,
        document: DocumentUpload<'_>,
    ) -> Result<ModelResponse, ModelError> {
        (**self).generate_from_document(prompt, document)
    }

    fn generate_from_text(&self, prompt: &str) -> Result<ModelResponse, ModelError> {
        (**self).generate_from_text(prompt)
    }
}

impl<M: GenerativeModel + ?Sized> GenerativeModel for Box<M> {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn generate_from_document(
        &self,
        prompt: &str,
        document: DocumentUpload<'_>,
    ) -> Result<ModelResponse, ModelError> {
        (**self).generate_from_document(prompt, document)
    }

    fn generate_from_text(&self, prompt: &str) -> Result<ModelResponse, ModelError> {
        (**self).generate_from_text(prompt)
    }
}
