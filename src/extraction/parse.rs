use serde_json::Value;

use crate::model::ExtractedRecord;

/// Result of reading the model's free-form answer as a JSON array of records.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(Vec<ExtractedRecord>),
    PartiallyParsed(Vec<ExtractedRecord>, Vec<String>),
    Unparseable(String),
}

impl ParseOutcome {
    /// Records plus the warnings that must accompany them.
    pub fn into_parts(self) -> (Vec<ExtractedRecord>, Vec<String>) {
        match self {
            Self::Parsed(records) => (records, Vec::new()),
            Self::PartiallyParsed(records, warnings) => (records, warnings),
            Self::Unparseable(raw) => (
                Vec::new(),
                vec![format!(
                    "model response contained no usable JSON; response starts with: {}",
                    preview(&raw, 200)
                )],
            ),
        }
    }
}

pub fn parse_response(raw: &str) -> ParseOutcome {
    let trimmed = raw.trim();
    let fenced = fenced_body(trimmed).filter(|body| !body.is_empty());

    fenced
        .into_iter()
        .chain(Some(trimmed).filter(|text| !text.is_empty()))
        .find_map(parse_content)
        .unwrap_or_else(|| ParseOutcome::Unparseable(raw.to_string()))
}

/// Tries a clean parse, then the outermost `[...]`, then per-object recovery.
fn parse_content(content: &str) -> Option<ParseOutcome> {
    if let Ok(value) = serde_json::from_str::<Value>(content) {
        if let Some(outcome) = outcome_from_value(value) {
            return Some(outcome);
        }
    }

    if let Some(slice) = bracketed_slice(content) {
        if let Ok(value) = serde_json::from_str::<Value>(slice) {
            if let Some(outcome) = outcome_from_value(value) {
                return Some(outcome);
            }
        }
    }

    let start = content.find('[').or_else(|| content.find('{'))?;
    let (records, mut warnings) = recover_objects(&content[start..]);
    if records.is_empty() {
        return None;
    }
    warnings.insert(
        0,
        format!(
            "model response JSON was malformed; recovered {} record(s)",
            records.len()
        ),
    );
    Some(ParseOutcome::PartiallyParsed(records, warnings))
}

/// Body of the first fenced code block, if the text has a fence at all.
fn fenced_body(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    let tag_len = after_fence
        .find(|character: char| !character.is_ascii_alphanumeric())
        .unwrap_or(after_fence.len());
    let body = &after_fence[tag_len..];
    let body = match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    };

    Some(body.trim())
}

fn bracketed_slice(content: &str) -> Option<&str> {
    let start = content.find('[')?;
    let end = content.rfind(']')?;
    (end > start).then(|| &content[start..=end])
}

fn outcome_from_value(value: Value) -> Option<ParseOutcome> {
    match value {
        Value::Array(items) => Some(outcome_from_items(items)),
        Value::Object(object) => {
            let nested = object.values().find_map(|value| match value {
                Value::Array(items)
                    if !items.is_empty() && items.iter().all(Value::is_object) =>
                {
                    Some(items.clone())
                }
                _ => None,
            });
            match nested {
                Some(items) => Some(outcome_from_items(items)),
                None => Some(ParseOutcome::Parsed(vec![object])),
            }
        }
        _ => None,
    }
}

fn outcome_from_items(items: Vec<Value>) -> ParseOutcome {
    let mut records = Vec::with_capacity(items.len());
    let mut warnings = Vec::new();

    for (index, item) in items.into_iter().enumerate() {
        match item {
            Value::Object(object) => records.push(object),
            other => warnings.push(format!(
                "dropped array element {index}: expected an object, found {}",
                json_type_name(&other)
            )),
        }
    }

    if warnings.is_empty() {
        ParseOutcome::Parsed(records)
    } else {
        ParseOutcome::PartiallyParsed(records, warnings)
    }
}

/// Walks the text element by element, keeping every balanced `{...}` that
/// parses (after trailing-comma repair) and dropping the rest.
fn recover_objects(content: &str) -> (Vec<ExtractedRecord>, Vec<String>) {
    let mut records = Vec::new();
    let mut warnings = Vec::new();

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut object_start: Option<usize> = None;

    for (offset, character) in content.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if character == '\\' {
                escaped = true;
            } else if character == '"' {
                in_string = false;
            }
            continue;
        }

        match character {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    object_start = Some(offset);
                }
                depth += 1;
            }
            '[' if object_start.is_some() => depth += 1,
            '}' | ']' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(start) = object_start.take() {
                        let candidate = &content[start..=offset];
                        match parse_object(candidate) {
                            Some(record) => records.push(record),
                            None => warnings.push(format!(
                                "dropped unparseable record: {}",
                                preview(candidate, 120)
                            )),
                        }
                    }
                }
            }
            _ => {}
        }
    }

    if let Some(start) = object_start {
        warnings.push(format!(
            "dropped truncated record at end of response: {}",
            preview(&content[start..], 120)
        ));
    }

    (records, warnings)
}

fn parse_object(candidate: &str) -> Option<ExtractedRecord> {
    let parsed = serde_json::from_str::<Value>(candidate)
        .ok()
        .or_else(|| serde_json::from_str::<Value>(&strip_trailing_commas(candidate)).ok());

    match parsed {
        Some(Value::Object(object)) => Some(object),
        _ => None,
    }
}

/// Removes commas that directly precede `}` or `]`, ignoring string contents.
fn strip_trailing_commas(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut pending_comma: Option<String> = None;
    let mut in_string = false;
    let mut escaped = false;

    for character in input.chars() {
        if in_string {
            output.push(character);
            if escaped {
                escaped = false;
            } else if character == '\\' {
                escaped = true;
            } else if character == '"' {
                in_string = false;
            }
            continue;
        }

        if let Some(buffer) = pending_comma.as_mut() {
            if character.is_whitespace() {
                buffer.push(character);
                continue;
            }
            let buffer = pending_comma.take().unwrap_or_default();
            if character == '}' || character == ']' {
                output.push_str(buffer.trim_start_matches(','));
            } else {
                output.push_str(&buffer);
            }
        }

        match character {
            ',' => pending_comma = Some(",".to_string()),
            '"' => {
                in_string = true;
                output.push(character);
            }
            _ => output.push(character),
        }
    }

    if let Some(buffer) = pending_comma {
        output.push_str(&buffer);
    }

    output
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<&str>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let truncated = collapsed.chars().take(max_chars).collect::<String>();
    format!("{truncated}...")
}
