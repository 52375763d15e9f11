use serde::Serialize;
use thiserror::Error;

/// Version stamp for the compiled-in parameter tables.
pub const CATALOG_VERSION: &str = "2025.08.1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown {kind} '{identifier}'")]
    NotFound {
        kind: &'static str,
        identifier: String,
    },
}

impl CatalogError {
    fn not_found(kind: &'static str, identifier: &str) -> Self {
        Self::NotFound {
            kind,
            identifier: identifier.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TracerColorMode {
    Color,
    Binary,
}

impl TracerColorMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Color => "color",
            Self::Binary => "binary",
        }
    }
}

/// Tracer parameter bundle behind one SVG preset id.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SvgPreset {
    pub id: &'static str,
    pub name: &'static str,
    pub color_mode: TracerColorMode,
    pub simplify_tolerance: f32,
    pub corner_smoothing: f32,
    pub max_paths: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VectorTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub template: &'static str,
    pub negative: &'static str,
    pub svg_preset: &'static str,
    pub recommended_size: [u32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnhancementStyle {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub best_for: &'static [&'static str],
    pub additions: &'static [&'static str],
    pub negative: &'static str,
    pub svg_preset: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PromptEntry {
    pub id: &'static str,
    pub name: &'static str,
    pub prompt: &'static str,
    pub negative_prompt: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PromptCategory {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub svg_preset: &'static str,
    pub prompts: &'static [PromptEntry],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelSpec {
    pub id: &'static str,
    pub display_name: &'static str,
    pub backend_id: &'static str,
    pub default_steps: u32,
    pub is_default: bool,
}

/// Prompt produced by substituting a subject into a vector template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedTemplate {
    pub template_id: String,
    pub subject: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub svg_preset: String,
    pub recommended_size: [u32; 2],
}

/// Read-only lookup over the compiled-in preset/template/style/model tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterCatalog;

impl ParameterCatalog {
    pub fn builtin() -> Self {
        Self
    }

    pub fn version(&self) -> &'static str {
        CATALOG_VERSION
    }

    pub fn svg_presets(&self) -> &'static [SvgPreset] {
        SVG_PRESETS
    }

    pub fn templates(&self) -> &'static [VectorTemplate] {
        VECTOR_TEMPLATES
    }

    pub fn enhancement_styles(&self) -> &'static [EnhancementStyle] {
        ENHANCEMENT_STYLES
    }

    pub fn prompt_categories(&self) -> &'static [PromptCategory] {
        PROMPT_CATEGORIES
    }

    pub fn models(&self) -> &'static [ModelSpec] {
        MODELS
    }

    pub fn default_model(&self) -> &'static ModelSpec {
        MODELS
            .iter()
            .find(|model| model.is_default)
            .unwrap_or(&MODELS[0])
    }

    pub fn svg_preset(&self, identifier: &str) -> Result<&'static SvgPreset, CatalogError> {
        SVG_PRESETS
            .iter()
            .find(|preset| preset.id == identifier)
            .ok_or_else(|| CatalogError::not_found("svg preset", identifier))
    }

    pub fn template(&self, identifier: &str) -> Result<&'static VectorTemplate, CatalogError> {
        VECTOR_TEMPLATES
            .iter()
            .find(|template| template.id == identifier)
            .ok_or_else(|| CatalogError::not_found("template", identifier))
    }

    pub fn enhancement_style(
        &self,
        identifier: &str,
    ) -> Result<&'static EnhancementStyle, CatalogError> {
        ENHANCEMENT_STYLES
            .iter()
            .find(|style| style.id == identifier)
            .ok_or_else(|| CatalogError::not_found("enhancement style", identifier))
    }

    pub fn prompt_category(
        &self,
        identifier: &str,
    ) -> Result<&'static PromptCategory, CatalogError> {
        PROMPT_CATEGORIES
            .iter()
            .find(|category| category.id == identifier)
            .ok_or_else(|| CatalogError::not_found("prompt category", identifier))
    }

    pub fn model(&self, identifier: &str) -> Result<&'static ModelSpec, CatalogError> {
        MODELS
            .iter()
            .find(|model| model.id == identifier)
            .ok_or_else(|| CatalogError::not_found("model", identifier))
    }

    pub fn apply_template(
        &self,
        identifier: &str,
        subject: &str,
    ) -> Result<AppliedTemplate, CatalogError> {
        let template = self.template(identifier)?;
        Ok(AppliedTemplate {
            template_id: template.id.to_string(),
            subject: subject.to_string(),
            prompt: template.template.replace("{subject}", subject.trim()),
            negative_prompt: template.negative.to_string(),
            svg_preset: template.svg_preset.to_string(),
            recommended_size: template.recommended_size,
        })
    }
}

const SVG_PRESETS: &[SvgPreset] = &[
    SvgPreset {
        id: "default",
        name: "Default",
        color_mode: TracerColorMode::Color,
        simplify_tolerance: 0.5,
        corner_smoothing: 0.5,
        max_paths: 512,
    },
    SvgPreset {
        id: "logo",
        name: "Logo",
        color_mode: TracerColorMode::Color,
        simplify_tolerance: 0.8,
        corner_smoothing: 0.7,
        max_paths: 64,
    },
    SvgPreset {
        id: "detailed",
        name: "Detailed",
        color_mode: TracerColorMode::Color,
        simplify_tolerance: 0.2,
        corner_smoothing: 0.3,
        max_paths: 2048,
    },
    SvgPreset {
        id: "simplified",
        name: "Simplified",
        color_mode: TracerColorMode::Color,
        simplify_tolerance: 0.9,
        corner_smoothing: 0.8,
        max_paths: 128,
    },
    SvgPreset {
        id: "bw",
        name: "Black & White",
        color_mode: TracerColorMode::Binary,
        simplify_tolerance: 0.7,
        corner_smoothing: 0.6,
        max_paths: 96,
    },
];

const VECTOR_TEMPLATES: &[VectorTemplate] = &[
    VectorTemplate {
        id: "logo_template",
        name: "Logo Template",
        description: "Optimized for clean logo SVG output",
        template: "{subject}, minimalist logo design, HIGH CONTRAST, bold solid colors, pure white background, flat vector style, clean sharp edges, no gradients, no shadows, professional corporate identity, geometric shapes",
        negative: "gradients, shadows, soft edges, photorealistic, 3d, texture, noise, blurry, complex details, realistic shading",
        svg_preset: "logo",
        recommended_size: [512, 512],
    },
    VectorTemplate {
        id: "icon_template",
        name: "Icon Template",
        description: "Optimized for simple icon SVG output",
        template: "{subject}, simple icon design, HIGH CONTRAST, single bold color, white background, flat design, clean geometric shape, minimal, vector style, sharp edges",
        negative: "gradients, shadows, realistic, detailed, textured, 3d, complex, photorealistic",
        svg_preset: "logo",
        recommended_size: [256, 256],
    },
    VectorTemplate {
        id: "illustration_template",
        name: "Illustration Template",
        description: "Optimized for flat illustration SVG output",
        template: "{subject}, flat vector illustration, HIGH CONTRAST, bold distinct colors, solid color fills, white background, clean edges, cartoon style, no gradients, graphic design style",
        negative: "gradients, shadows, realistic, photorealistic, complex shading, soft edges, 3d, detailed textures",
        svg_preset: "default",
        recommended_size: [1024, 1024],
    },
    VectorTemplate {
        id: "silhouette_template",
        name: "Silhouette Template",
        description: "Perfect for single-color silhouette SVG",
        template: "{subject}, bold black silhouette, HIGH CONTRAST, solid black shape on pure white background, clean sharp edges, no details inside, flat vector style",
        negative: "gradients, shading, gray tones, details, texture, 3d, realistic",
        svg_preset: "bw",
        recommended_size: [512, 512],
    },
    VectorTemplate {
        id: "badge_template",
        name: "Badge Template",
        description: "Optimized for badge/emblem SVG output",
        template: "{subject}, circular badge emblem, HIGH CONTRAST, 2-3 bold colors, white background, flat vector design, clean geometric shapes, vintage badge style, sharp edges",
        negative: "gradients, shadows, photorealistic, complex details, soft edges, 3d effects, realistic textures",
        svg_preset: "logo",
        recommended_size: [512, 512],
    },
    VectorTemplate {
        id: "infographic_template",
        name: "Infographic Template",
        description: "Optimized for data visualization elements",
        template: "{subject}, infographic design element, HIGH CONTRAST, bold flat colors, white background, clean vector style, geometric shapes, data visualization, sharp clean edges",
        negative: "gradients, shadows, photorealistic, complex details, soft edges, 3d rendering",
        svg_preset: "simplified",
        recommended_size: [800, 600],
    },
];

const ENHANCEMENT_STYLES: &[EnhancementStyle] = &[
    EnhancementStyle {
        id: "logo",
        name: "Logo",
        description: "Optimized for minimalist logo designs with clean edges",
        best_for: &["company logos", "brand marks", "corporate identity"],
        additions: &[
            "minimalist logo design",
            "pure white background",
            "professional corporate identity",
            "geometric shapes",
            "scalable",
        ],
        negative: "gradients, shadows, soft edges, photorealistic, 3d, texture, noise, blurry, complex details, realistic shading, soft lighting",
        svg_preset: "logo",
    },
    EnhancementStyle {
        id: "icon",
        name: "Icon",
        description: "Optimized for simple, single-color icons",
        best_for: &["app icons", "UI icons", "simple symbols"],
        additions: &[
            "simple icon design",
            "single bold color",
            "white background",
            "minimal geometric shape",
            "clean lines",
        ],
        negative: "gradients, shadows, realistic, detailed, textured, 3d, complex, photorealistic, soft edges",
        svg_preset: "logo",
    },
    EnhancementStyle {
        id: "illustration",
        name: "Illustration",
        description: "Optimized for flat vector illustrations",
        best_for: &["characters", "scenes", "infographics"],
        additions: &[
            "flat vector illustration",
            "bold distinct colors",
            "solid color fills",
            "white background",
            "cartoon style",
            "graphic design",
        ],
        negative: "gradients, shadows, realistic, photorealistic, complex shading, soft edges, 3d, detailed textures, soft lighting",
        svg_preset: "default",
    },
    EnhancementStyle {
        id: "silhouette",
        name: "Silhouette",
        description: "Optimized for bold black silhouettes",
        best_for: &["silhouette art", "cutouts", "stencils"],
        additions: &[
            "bold black silhouette",
            "solid black shape",
            "pure white background",
            "no internal details",
        ],
        negative: "gradients, shading, gray tones, details inside shape, texture, 3d, realistic, colors",
        svg_preset: "bw",
    },
    EnhancementStyle {
        id: "badge",
        name: "Badge",
        description: "Optimized for circular badge/emblem designs",
        best_for: &["emblems", "seals", "vintage badges"],
        additions: &[
            "circular badge emblem",
            "2-3 bold colors maximum",
            "vintage badge aesthetic",
            "clean geometric elements",
        ],
        negative: "gradients, shadows, photorealistic, complex details, soft edges, 3d effects, many colors",
        svg_preset: "logo",
    },
];

const PROMPT_CATEGORIES: &[PromptCategory] = &[
    PromptCategory {
        id: "vector_logos",
        name: "Vector Logos",
        description: "Logo designs optimized for SVG conversion",
        svg_preset: "logo",
        prompts: &[
            PromptEntry {
                id: "tech_logo",
                name: "Tech Company Logo",
                prompt: "minimalist tech company logo, geometric shapes, HIGH CONTRAST, bold solid colors on pure white background, flat vector design, clean sharp edges, no gradients, no shadows, professional corporate identity",
                negative_prompt: "gradients, shadows, soft edges, photorealistic, 3d, texture, noise, blurry, complex details",
            },
            PromptEntry {
                id: "startup_logo",
                name: "Startup Logo",
                prompt: "modern startup logo, abstract geometric symbol, HIGH CONTRAST, 2-3 bold colors maximum, pure white background, flat design, sharp clean lines, minimalist, scalable vector style",
                negative_prompt: "gradients, shadows, realistic, complex, detailed, textured, 3d effects, soft edges",
            },
            PromptEntry {
                id: "eco_logo",
                name: "Eco/Nature Logo",
                prompt: "eco-friendly nature logo, leaf or tree symbol, HIGH CONTRAST, green and white, pure white background, flat vector design, clean geometric shapes, minimalist environmental branding",
                negative_prompt: "gradients, shadows, realistic leaves, complex details, photorealistic, 3d",
            },
        ],
    },
    PromptCategory {
        id: "vector_icons",
        name: "Vector Icons",
        description: "Simple icons for UI/UX and applications",
        svg_preset: "logo",
        prompts: &[
            PromptEntry {
                id: "app_icon",
                name: "App Icon",
                prompt: "simple app icon, single bold symbol, HIGH CONTRAST, solid flat color on white background, clean geometric shape, minimal design, vector style, sharp edges",
                negative_prompt: "gradients, shadows, realistic, detailed, textured, 3d, complex",
            },
            PromptEntry {
                id: "ui_icon",
                name: "UI Icon",
                prompt: "UI interface icon, simple geometric symbol, HIGH CONTRAST, single solid color, white background, flat design, clean lines, pixel-perfect vector style",
                negative_prompt: "gradients, shadows, realistic, complex, detailed, 3d effects",
            },
            PromptEntry {
                id: "emoji_icon",
                name: "Emoji Style Icon",
                prompt: "cute emoji style icon, simple round design, HIGH CONTRAST, bold flat colors, white background, cartoon vector style, clean outlines, friendly expression",
                negative_prompt: "gradients, shadows, realistic, complex shading, 3d, photorealistic",
            },
        ],
    },
    PromptCategory {
        id: "vector_illustrations",
        name: "Vector Illustrations",
        description: "Flat illustrations suitable for vectorization",
        svg_preset: "default",
        prompts: &[
            PromptEntry {
                id: "flat_character",
                name: "Flat Character",
                prompt: "flat design character illustration, simple geometric shapes, HIGH CONTRAST, bold distinct colors, solid color fills, white background, clean vector art style, no gradients, cartoon style",
                negative_prompt: "gradients, shadows, realistic, photorealistic, complex shading, soft edges, 3d",
            },
            PromptEntry {
                id: "isometric_scene",
                name: "Isometric Scene",
                prompt: "isometric illustration, geometric buildings and objects, HIGH CONTRAST, flat bold colors, clean sharp edges, white background, vector art style, no gradients, architectural diagram style",
                negative_prompt: "gradients, shadows, realistic, complex details, soft lighting, 3d render",
            },
            PromptEntry {
                id: "spot_illustration",
                name: "Spot Illustration",
                prompt: "editorial spot illustration, simple bold shapes, HIGH CONTRAST, limited color palette 3-4 colors, white background, flat vector style, clean geometric design",
                negative_prompt: "gradients, shadows, photorealistic, complex shading, detailed textures",
            },
        ],
    },
    PromptCategory {
        id: "vector_patterns",
        name: "Vector Patterns",
        description: "Seamless patterns for backgrounds and textures",
        svg_preset: "simplified",
        prompts: &[
            PromptEntry {
                id: "geometric_pattern",
                name: "Geometric Pattern",
                prompt: "seamless geometric pattern, repeating shapes, HIGH CONTRAST, bold two-tone colors, flat design, clean sharp edges, vector tile pattern, no gradients",
                negative_prompt: "gradients, shadows, realistic, complex, soft edges, 3d",
            },
            PromptEntry {
                id: "abstract_pattern",
                name: "Abstract Pattern",
                prompt: "abstract seamless pattern, organic shapes, HIGH CONTRAST, limited color palette, flat bold colors, vector art style, clean edges, repeating design",
                negative_prompt: "gradients, shadows, photorealistic, complex details, soft blending",
            },
        ],
    },
    PromptCategory {
        id: "vector_symbols",
        name: "Vector Symbols",
        description: "Abstract symbols and marks",
        svg_preset: "logo",
        prompts: &[
            PromptEntry {
                id: "abstract_mark",
                name: "Abstract Mark",
                prompt: "abstract geometric symbol, bold distinctive shape, HIGH CONTRAST, single solid color on white background, flat vector design, clean sharp edges, memorable brand mark",
                negative_prompt: "gradients, shadows, realistic, complex, detailed, textured, 3d",
            },
            PromptEntry {
                id: "monogram",
                name: "Monogram",
                prompt: "elegant monogram letter design, intertwined letters, HIGH CONTRAST, single bold color on white, flat vector style, clean geometric letterforms, sharp edges",
                negative_prompt: "gradients, shadows, ornate details, 3d effects, soft edges",
            },
            PromptEntry {
                id: "badge_emblem",
                name: "Badge/Emblem",
                prompt: "circular badge emblem design, bold geometric elements, HIGH CONTRAST, 2-3 colors maximum, white background, flat vector style, clean sharp lines, vintage badge aesthetic",
                negative_prompt: "gradients, shadows, photorealistic, complex details, soft edges, 3d",
            },
        ],
    },
    PromptCategory {
        id: "photorealistic",
        name: "Photorealistic",
        description: "High-quality photorealistic images (not optimized for SVG)",
        svg_preset: "detailed",
        prompts: &[
            PromptEntry {
                id: "portrait",
                name: "Portrait",
                prompt: "professional portrait photograph, natural lighting, high detail, sharp focus, studio quality",
                negative_prompt: "blurry, distorted, artificial, cartoon",
            },
            PromptEntry {
                id: "landscape",
                name: "Landscape",
                prompt: "stunning landscape photograph, golden hour lighting, high dynamic range, professional photography",
                negative_prompt: "blurry, oversaturated, artificial",
            },
            PromptEntry {
                id: "product",
                name: "Product Shot",
                prompt: "professional product photography, clean white background, studio lighting, high detail, commercial quality",
                negative_prompt: "blurry, distorted, messy background",
            },
        ],
    },
];

const MODELS: &[ModelSpec] = &[
    ModelSpec {
        id: "fast",
        display_name: "Kontur Fast",
        backend_id: "z-image-turbo",
        default_steps: 8,
        is_default: true,
    },
    ModelSpec {
        id: "quality",
        display_name: "Kontur Quality",
        backend_id: "z-image-base",
        default_steps: 30,
        is_default: false,
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn resolves_known_identifiers() {
        let catalog = ParameterCatalog::builtin();
        assert_eq!(
            catalog.svg_preset("logo").expect("logo preset").max_paths,
            64
        );
        assert_eq!(
            catalog.model("fast").expect("fast model").backend_id,
            "z-image-turbo"
        );
        assert_eq!(
            catalog
                .enhancement_style("silhouette")
                .expect("silhouette style")
                .svg_preset,
            "bw"
        );
    }

    #[test]
    fn unknown_identifiers_are_not_found() {
        let catalog = ParameterCatalog::builtin();
        let error = catalog.svg_preset("neon").expect_err("should miss");
        assert_eq!(
            error,
            CatalogError::NotFound {
                kind: "svg preset",
                identifier: String::from("neon"),
            }
        );
        assert!(catalog.template("missing_template").is_err());
        assert!(catalog.model("xl").is_err());
    }

    #[test]
    fn apply_template_substitutes_the_subject() {
        let catalog = ParameterCatalog::builtin();
        let applied = catalog
            .apply_template("logo_template", "mountain peak")
            .expect("template should apply");
        assert!(applied.prompt.starts_with("mountain peak, minimalist logo design"));
        assert!(!applied.prompt.contains("{subject}"));
        assert_eq!(applied.svg_preset, "logo");
        assert_eq!(applied.recommended_size, [512, 512]);
    }

    #[test]
    fn default_model_is_marked() {
        let catalog = ParameterCatalog::builtin();
        assert_eq!(catalog.default_model().id, "fast");
    }

    #[test]
    fn every_cross_reference_resolves() {
        let catalog = ParameterCatalog::builtin();
        for template in catalog.templates() {
            catalog
                .svg_preset(template.svg_preset)
                .expect("template preset should resolve");
            assert!(template.template.contains("{subject}"));
        }
        for style in catalog.enhancement_styles() {
            catalog
                .svg_preset(style.svg_preset)
                .expect("style preset should resolve");
        }
        for category in catalog.prompt_categories() {
            catalog
                .svg_preset(category.svg_preset)
                .expect("category preset should resolve");
            assert!(!category.prompts.is_empty());
        }
    }

    #[test]
    fn logo_ceiling_is_tighter_than_detailed() {
        let catalog = ParameterCatalog::builtin();
        let logo = catalog.svg_preset("logo").expect("logo");
        let detailed = catalog.svg_preset("detailed").expect("detailed");
        assert!(logo.max_paths < detailed.max_paths);
        assert!(logo.simplify_tolerance > detailed.simplify_tolerance);
    }
}
