use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use crate::api::handler_utils::{not_found_error, ok_reply, validation_error, ApiReply};
use crate::api::server::AppState;
use crate::catalog::{EnhancementStyle, ModelSpec, PromptCategory, SvgPreset, VectorTemplate};

#[derive(Debug, Clone, Serialize)]
struct ModelsResponse {
    default_model: &'static str,
    models: &'static [ModelSpec],
    svg_presets: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
struct PresetsResponse {
    count: usize,
    presets: &'static [SvgPreset],
}

#[derive(Debug, Clone, Serialize)]
struct TemplatesResponse {
    count: usize,
    templates: &'static [VectorTemplate],
}

#[derive(Debug, Clone, Serialize)]
struct StylesResponse {
    count: usize,
    styles: &'static [EnhancementStyle],
}

#[derive(Debug, Clone, Serialize)]
struct PromptsResponse {
    count: usize,
    categories: Vec<&'static PromptCategory>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplyTemplateQuery {
    pub subject: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptsQuery {
    pub category: Option<String>,
}

pub async fn list_models_handler(State(state): State<AppState>) -> ApiReply {
    let catalog = state.catalog;
    ok_reply(ModelsResponse {
        default_model: catalog.default_model().id,
        models: catalog.models(),
        svg_presets: catalog.svg_presets().iter().map(|preset| preset.id).collect(),
    })
}

pub async fn list_presets_handler(State(state): State<AppState>) -> ApiReply {
    let presets = state.catalog.svg_presets();
    ok_reply(PresetsResponse {
        count: presets.len(),
        presets,
    })
}

pub async fn list_templates_handler(State(state): State<AppState>) -> ApiReply {
    let templates = state.catalog.templates();
    ok_reply(TemplatesResponse {
        count: templates.len(),
        templates,
    })
}

pub async fn apply_template_handler(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
    Query(query): Query<ApplyTemplateQuery>,
) -> ApiReply {
    let Some(subject) = query
        .subject
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    else {
        return validation_error("Query parameter 'subject' is required");
    };

    match state.catalog.apply_template(template_id.as_str(), subject) {
        Ok(applied) => ok_reply(applied),
        Err(error) => not_found_error(error.to_string()),
    }
}

pub async fn list_styles_handler(State(state): State<AppState>) -> ApiReply {
    let styles = state.catalog.enhancement_styles();
    ok_reply(StylesResponse {
        count: styles.len(),
        styles,
    })
}

pub async fn list_prompts_handler(
    State(state): State<AppState>,
    Query(query): Query<PromptsQuery>,
) -> ApiReply {
    let catalog = state.catalog;
    let categories: Vec<&'static PromptCategory> = match query
        .category
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        Some(identifier) => match catalog.prompt_category(identifier) {
            Ok(category) => vec![category],
            Err(error) => return not_found_error(error.to_string()),
        },
        None => catalog.prompt_categories().iter().collect(),
    };

    ok_reply(PromptsResponse {
        count: categories.len(),
        categories,
    })
}
