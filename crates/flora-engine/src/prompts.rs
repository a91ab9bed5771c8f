use flora_contracts::models::{Mode, StylePreferences};

const EDIT_PREAMBLE: &str = "You are a professional floral designer retouching a photograph. \
Modify only the masked or described region of the image and preserve everything else exactly. \
Keep the result photorealistic, with lighting and shadows consistent with the original scene.";

const CREATE_PREAMBLE: &str = "You are a professional floral designer staging a photograph. \
Add the described floral objects to the scene. Respect the perspective, scale and lighting of the \
existing space and do not alter any element that is already present.";

const HUMANIZE_PREAMBLE: &str = "Convert this image into a high-fidelity photorealistic render \
with 8K-equivalent detail.";

const HUMANIZE_DEFAULT_CLAUSE: &str = "Keep the existing structure and composition and apply \
realistic natural lighting.";

const QUALITY_CLAUSE: &str = "Render at maximum detail and fidelity; avoid compression \
artifacts, banding and blur.";

/// Fixed system preamble for a mode. Exactly one template per mode.
pub fn preamble(mode: Mode) -> &'static str {
    match mode {
        Mode::Edit => EDIT_PREAMBLE,
        Mode::Create => CREATE_PREAMBLE,
        Mode::Humanize => HUMANIZE_PREAMBLE,
    }
}

/// Final instruction text sent to the generative service.
pub fn compose_instruction(
    mode: Mode,
    instruction: &str,
    quality_hint: bool,
    preferences: Option<&StylePreferences>,
) -> String {
    let instruction = instruction.trim();
    let mut sections = vec![preamble(mode).to_string()];

    match mode {
        Mode::Edit | Mode::Create => {
            sections.push(format!("Requested change: {instruction}"));
        }
        Mode::Humanize => {
            let stated = (!instruction.is_empty()).then(|| instruction.to_string());
            let preferred = preferences.and_then(StylePreferences::describe);
            match (stated, preferred) {
                (None, None) => sections.push(HUMANIZE_DEFAULT_CLAUSE.to_string()),
                (stated, preferred) => {
                    if let Some(stated) = stated {
                        sections.push(format!("Apply these style, species and color preferences: {stated}"));
                    }
                    if let Some(preferred) = preferred {
                        sections.push(format!("Saved preferences ({preferred})."));
                    }
                }
            }
        }
    }

    if quality_hint {
        sections.push(QUALITY_CLAUSE.to_string());
    }
    sections.join("\n\n")
}
