use super::types::ModelInfo;

pub const DEFAULT_MODEL: &str = "Llama-3.3-70B-Instruct";

/// Selectable Llama models.
pub const MODELS: &[ModelInfo] = &[
    ModelInfo {
        id: "Llama-4-Maverick-17B-128E-Instruct-FP8",
        name: "Llama 4 Maverick 17B",
        description: "Fast and efficient model for general tasks",
    },
    ModelInfo {
        id: "Llama-4-Scout-17B-16E-Instruct-FP8",
        name: "Llama 4 Scout 17B",
        description: "Creative and detailed responses",
    },
    ModelInfo {
        id: "Llama-3.3-70B-Instruct",
        name: "Llama 3.3 70B",
        description: "Most comprehensive and detailed responses",
    },
    ModelInfo {
        id: "Llama-3.3-8B-Instruct",
        name: "Llama 3.3 8B",
        description: "Practical and helpful for everyday tasks",
    },
];

pub fn find_model(id: &str) -> Option<&'static ModelInfo> {
    MODELS.iter().find(|m| m.id == id)
}
