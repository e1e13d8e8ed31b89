use serde_json::{Map, Value};

use super::settings::AppSettings;
use crate::core::errors::ApiError;

pub fn validate_config(config: &Value) -> Result<(), ApiError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_optional_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 0, 65535)?;
        validate_string_array_field(
            server,
            "server.cors_allowed_origins",
            "cors_allowed_origins",
        )?;
    }

    if let Some(llm) = expect_optional_object(root, "llm")? {
        validate_optional_string_field(llm, "llm.provider", "provider")?;
        validate_optional_string_field(llm, "llm.endpoint", "endpoint")?;
        validate_optional_string_field(llm, "llm.api_key", "api_key")?;
        validate_optional_string_field(llm, "llm.api_version", "api_version")?;
        validate_optional_string_field(llm, "llm.embedding_model", "embedding_model")?;
        validate_f64_field(llm, "llm.temperature", "temperature", 0.0, 2.0)?;
        validate_u64_field(llm, "llm.max_tokens", "max_tokens", 1, 1_000_000)?;
        validate_u64_field(
            llm,
            "llm.request_timeout_secs",
            "request_timeout_secs",
            1,
            86_400,
        )?;
        validate_string_array_field(llm, "llm.models", "models")?;
        if let Some(models) = llm.get("models").and_then(|v| v.as_array()) {
            if models.is_empty() {
                return Err(ApiError::BadRequest(
                    "Invalid config at 'llm.models': at least one model is required".to_string(),
                ));
            }
        }
    }

    if let Some(rag) = expect_optional_object(root, "rag")? {
        validate_optional_string_field(rag, "rag.embedder", "embedder")?;
        validate_u64_field(rag, "rag.hash_dimension", "hash_dimension", 1, 65_536)?;
        validate_u64_field(rag, "rag.chunk_size", "chunk_size", 1, 1_000_000)?;
        validate_u64_field(rag, "rag.chunk_overlap", "chunk_overlap", 0, 1_000_000)?;
        validate_u64_field(
            rag,
            "rag.max_chunks_per_source",
            "max_chunks_per_source",
            1,
            100_000,
        )?;
        validate_u64_field(rag, "rag.max_sources", "max_sources", 1, 10_000)?;
        validate_u64_field(rag, "rag.top_k", "top_k", 1, 1_000)?;
        validate_f64_field(
            rag,
            "rag.similarity_threshold",
            "similarity_threshold",
            -1.0,
            1.0,
        )?;
        validate_u64_field(
            rag,
            "rag.max_context_length",
            "max_context_length",
            1,
            10_000_000,
        )?;
        validate_u64_field(rag, "rag.web_timeout_secs", "web_timeout_secs", 1, 86_400)?;
        validate_u64_field(rag, "rag.max_fetch_bytes", "max_fetch_bytes", 1, 1_000_000_000)?;
        validate_u64_field(
            rag,
            "rag.max_upload_bytes",
            "max_upload_bytes",
            1,
            1_000_000_000,
        )?;
        validate_optional_string_field(rag, "rag.system_prompt", "system_prompt")?;
    }

    if let Some(chat) = expect_optional_object(root, "chat")? {
        validate_u64_field(
            chat,
            "chat.max_input_length",
            "max_input_length",
            1,
            10_000_000,
        )?;
    }

    if let Some(session) = expect_optional_object(root, "session")? {
        validate_u64_field(
            session,
            "session.idle_timeout_secs",
            "idle_timeout_secs",
            1,
            31_536_000,
        )?;
        validate_u64_field(
            session,
            "session.reap_interval_secs",
            "reap_interval_secs",
            1,
            86_400,
        )?;
    }

    Ok(())
}

/// Cross-field checks that only make sense once defaults are filled in.
pub fn validate_settings(settings: &AppSettings) -> Result<(), ApiError> {
    if settings.rag.chunk_overlap >= settings.rag.chunk_size {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at 'rag.chunk_overlap': must be smaller than chunk_size ({})",
            settings.rag.chunk_size
        )));
    }
    if !settings.rag.system_prompt.contains("{context}") {
        return Err(ApiError::BadRequest(
            "Invalid config at 'rag.system_prompt': missing {context} placeholder".to_string(),
        ));
    }
    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, ApiError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(config_type_error(key, "object")),
        None => Ok(None),
    }
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() {
        return Ok(());
    }
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(range_error(path, min, max));
    }
    Ok(())
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if number < min || number > max {
        return Err(range_error(path, min, max));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() || value.as_str().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "string"))
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(config_type_error(&format!("{}[{}]", path, index), "string"));
        };
        if text.trim().is_empty() {
            return Err(ApiError::BadRequest(format!(
                "Invalid config at '{}[{}]': value cannot be empty",
                path, index
            )));
        }
    }
    Ok(())
}

fn range_error<T: std::fmt::Display>(path: &str, min: T, max: T) -> ApiError {
    ApiError::BadRequest(format!(
        "Invalid config at '{}': must be between {} and {}",
        path, min, max
    ))
}

fn config_type_error(path: &str, expected: &str) -> ApiError {
    ApiError::BadRequest(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}
