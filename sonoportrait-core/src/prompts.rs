use crate::params::StageParams;
use crate::types::GenerationStage;
use serde::{Deserialize, Serialize};

pub const ETHNICITY_PLACEHOLDER: &str = "{ethnicity_prompt}";

const OUTLINE_POSITIVE: &str = "Photo of a sleeping newborn baby head based on the image. Head only, no body, matching the exact facial orientation as input image. Detailed face structure with prominent facial features.";

const OUTLINE_NEGATIVE: &str = "Open eyes, Ugly, Weird Mouth, Crooked Mouth, twisted limbs, bad skin, wrinkles, uneven face, open mouth, lowers, bad anatomy, bad hands, missing fingers, extra digits, cropped, worst quality, low quality, mutant";

const STRUCTURE_POSITIVE: &str = "Portrait of a sleeping beautiful newborn baby with {ethnicity_prompt}NO HAT, natural hair, clearly visible hairline, wrapped in soft blanket, swaddled tightly with only face visible, white background. matching the exact facial orientation as input image.";

const STRUCTURE_NEGATIVE: &str = "different facial orientation, hat, cap, beanie, head covering, head wrap, headwear, Multiple eyebrows, Asymmetrical eyes, Open eyes, visible limbs, hands, arms, fingers, feet, legs, exposed body parts, ugly, weird mouth, cropped, bad anatomy, deformities, blurry, low quality, unrealistic skin texture, uneven face";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplates {
    pub outline_positive: String,
    pub outline_negative: String,
    pub structure_positive: String,
    pub structure_negative: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            outline_positive: OUTLINE_POSITIVE.into(),
            outline_negative: OUTLINE_NEGATIVE.into(),
            structure_positive: STRUCTURE_POSITIVE.into(),
            structure_negative: STRUCTURE_NEGATIVE.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePrompts {
    pub positive: String,
    pub negative: String,
}

/// Resolves the prompts sent for `stage`.
///
/// Explicit overrides in `params.advanced` win over the templates. Either source may use the
/// `{ethnicity_prompt}` placeholder.
pub fn build_stage_prompts(
    stage: GenerationStage,
    params: &StageParams,
    templates: &PromptTemplates,
) -> StagePrompts {
    let (positive, negative) = match stage {
        GenerationStage::Outline => (&templates.outline_positive, &templates.outline_negative),
        GenerationStage::StructureControl => {
            (&templates.structure_positive, &templates.structure_negative)
        }
    };

    let positive = params
        .advanced
        .positive_prompt
        .as_ref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(positive);
    let negative = params.advanced.negative_prompt.as_ref().unwrap_or(negative);

    let fragment = params.ethnicity.prompt_fragment();
    StagePrompts {
        positive: tidy(&positive.replace(ETHNICITY_PLACEHOLDER, fragment)),
        negative: tidy(&negative.replace(ETHNICITY_PLACEHOLDER, fragment)),
    }
}

fn tidy(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
