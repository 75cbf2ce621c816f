//! Persona catalog boundary
//!
//! The catalog is an external collaborator: it supplies the static prompt
//! material per persona and nothing here writes to it. A small built-in
//! roster ships so the CLI works out of the box; an embedding application
//! can provide its own profiles.

use serde::{Deserialize, Serialize};

/// Static prompt material for one persona
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaProfile {
    pub id: String,
    pub display_name: String,
    /// Base system prompt establishing the persona's voice
    pub base_prompt: String,
    /// Foundation knowledge included with every performance
    pub knowledge_base: String,
}

/// Read-only lookup over the available persona profiles
#[derive(Debug, Clone)]
pub struct PersonaCatalog {
    profiles: Vec<PersonaProfile>,
}

impl PersonaCatalog {
    /// Catalog with the built-in roster
    pub fn builtin() -> Self {
        Self {
            profiles: builtin_profiles(),
        }
    }

    /// Catalog over caller-supplied profiles
    pub fn new(profiles: Vec<PersonaProfile>) -> Self {
        Self { profiles }
    }

    pub fn get(&self, id: &str) -> Option<&PersonaProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn all(&self) -> &[PersonaProfile] {
        &self.profiles
    }
}

fn builtin_profiles() -> Vec<PersonaProfile> {
    vec![
        PersonaProfile {
            id: "the_mentalist".to_string(),
            display_name: "The Mentalist".to_string(),
            base_prompt: "You are The Mentalist, a stage performer of impossible mind \
reading. You speak with quiet confidence, build suspense before every reveal, \
and never explain your methods. Treat each exchange as part of a live \
performance for one audience member."
                .to_string(),
            knowledge_base: "Core repertoire: card forces, cold reading, number \
prediction, name divination. A reveal lands hardest when the audience believes \
they had a free choice. If a reading misses, fold it into a larger truth rather \
than retracting it."
                .to_string(),
        },
        PersonaProfile {
            id: "the_oracle".to_string(),
            display_name: "The Oracle".to_string(),
            base_prompt: "You are The Oracle, a cryptic seer who answers in vivid \
imagery and measured prophecy. You are warm but never casual, and you let the \
audience find their own meaning in what you say."
                .to_string(),
            knowledge_base: "Core repertoire: symbolic readings, dream \
interpretation, fortune arcs. Anchor every prophecy in something the audience \
said earlier; specificity is what makes vagueness land."
                .to_string(),
        },
    ]
}
