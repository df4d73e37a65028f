//! Labelled dataset rows.
//!
//! Serde names match the dataset header columns, so a `MailRecord` is
//! written and read with the `csv` crate without any manual mapping.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::mail::ReadState;

/// Dataset header, in column order.
pub const COLUMNS: [&str; 12] = [
    "Remitente_ID",
    "Dominio",
    "Nombre_Mostrar",
    "Asunto",
    "Cuerpo_Snippet",
    "Estoy_En_To",
    "Estoy_En_CC",
    "Total_Destinatarios",
    "Carpeta_Origen",
    "Estado_Lectura",
    "Accion_Detectada",
    "TARGET_IA",
];

/// What the owner did with an item, from the transport's last-verb property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObservedAction {
    #[serde(rename = "Ninguna")]
    None,
    #[serde(rename = "Respondido")]
    Replied,
    #[serde(rename = "Reenviado")]
    Forwarded,
}

impl ObservedAction {
    /// Verb codes: 102 reply, 103 reply-all, 104 forward.
    pub fn from_last_verb(verb: Option<i64>) -> Self {
        match verb {
            Some(102) | Some(103) => Self::Replied,
            Some(104) => Self::Forwarded,
            _ => Self::None,
        }
    }

    pub fn is_action(self) -> bool {
        self != Self::None
    }
}

/// Ground-truth class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Label {
    Ignored = 0,
    Informational = 1,
    Actioned = 2,
}

impl Label {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Ignored),
            1 => Some(Self::Informational),
            2 => Some(Self::Actioned),
            _ => None,
        }
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        Label::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown label code {code}")))
    }
}

/// One processed mail item plus its label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailRecord {
    /// Normalized lowercase sender identity.
    #[serde(rename = "Remitente_ID")]
    pub sender_id: String,

    /// Domain part of `sender_id`, or the internal sentinel.
    #[serde(rename = "Dominio")]
    pub sender_domain: String,

    /// Cleaned sender display name.
    #[serde(rename = "Nombre_Mostrar")]
    pub display_name: String,

    /// Cleaned subject.
    #[serde(rename = "Asunto")]
    pub subject: String,

    /// Cleaned, truncated body.
    #[serde(rename = "Cuerpo_Snippet")]
    pub body_snippet: String,

    #[serde(rename = "Estoy_En_To", with = "flag")]
    pub is_primary_recipient: bool,

    #[serde(rename = "Estoy_En_CC", with = "flag")]
    pub is_copied_recipient: bool,

    /// True recipient total, not capped by the role scan.
    #[serde(rename = "Total_Destinatarios")]
    pub recipient_count: u32,

    /// Cleaned name of the folder the item came from.
    #[serde(rename = "Carpeta_Origen")]
    pub origin_folder: String,

    #[serde(rename = "Estado_Lectura")]
    pub read_state: ReadState,

    #[serde(rename = "Accion_Detectada")]
    pub observed_action: ObservedAction,

    #[serde(rename = "TARGET_IA")]
    pub label: Label,
}

/// Booleans stored as `0`/`1`.
pub(crate) mod flag {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        Ok(u8::deserialize(deserializer)? != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_verb_mapping() {
        assert_eq!(ObservedAction::from_last_verb(Some(102)), ObservedAction::Replied);
        assert_eq!(ObservedAction::from_last_verb(Some(103)), ObservedAction::Replied);
        assert_eq!(ObservedAction::from_last_verb(Some(104)), ObservedAction::Forwarded);
        assert_eq!(ObservedAction::from_last_verb(Some(105)), ObservedAction::None);
        assert_eq!(ObservedAction::from_last_verb(None), ObservedAction::None);
    }

    #[test]
    fn test_label_codes() {
        assert_eq!(Label::Actioned.code(), 2);
        assert_eq!(Label::from_code(0), Some(Label::Ignored));
        assert_eq!(Label::from_code(7), None);
    }
}
