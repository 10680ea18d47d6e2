//! Proposal data models
//!
//! A proposal tracks one boleto agreement between a payer and a beneficiary.

use crate::error::{invalid_argument, AppError};
use crate::ledger::ProposalRow;
use serde::{Deserialize, Serialize};

/// Number of positional arguments taken by `registrarProposta`
pub const REGISTER_ARITY: usize = 5;

/// Number of positional arguments taken by `consultarProposta`
pub const QUERY_ARITY: usize = 1;

/// A boleto payment proposal.
///
/// The three flags are independent; the store does not enforce any
/// ordering between acceptance and payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Caller-assigned identifier, immutable once created
    #[serde(rename = "id_proposta")]
    pub id: String,
    /// Payer tax id (CPF), opaque to the store
    #[serde(rename = "cpf_pagador")]
    pub payer_tax_id: String,
    #[serde(rename = "pagador_aceitou")]
    pub payer_accepted: bool,
    #[serde(rename = "beneficiario_aceitou")]
    pub beneficiary_accepted: bool,
    #[serde(rename = "boleto_pago")]
    pub paid: bool,
}

impl Proposal {
    /// Parse the positional arguments of `registrarProposta`:
    /// id, payer tax id, payer accepted, beneficiary accepted, paid.
    pub fn from_args(args: &[String]) -> Result<Self, AppError> {
        if args.len() != REGISTER_ARITY {
            return Err(invalid_argument(format!(
                "Incorrect number of arguments. Expecting {}, got {}",
                REGISTER_ARITY,
                args.len()
            )));
        }

        Ok(Self {
            id: args[0].clone(),
            payer_tax_id: args[1].clone(),
            payer_accepted: parse_bool("pagadorAceitou", &args[2])?,
            beneficiary_accepted: parse_bool("beneficiarioAceitou", &args[3])?,
            paid: parse_bool("boletoPago", &args[4])?,
        })
    }

    /// Rebuild a proposal from a host row; `None` when any column is missing.
    pub fn from_row(row: ProposalRow) -> Option<Self> {
        Some(Self {
            id: row.id,
            payer_tax_id: row.payer_tax_id?,
            payer_accepted: row.payer_accepted?,
            beneficiary_accepted: row.beneficiary_accepted?,
            paid: row.paid?,
        })
    }

    pub fn to_row(&self) -> ProposalRow {
        ProposalRow {
            id: self.id.clone(),
            payer_tax_id: Some(self.payer_tax_id.clone()),
            payer_accepted: Some(self.payer_accepted),
            beneficiary_accepted: Some(self.beneficiary_accepted),
            paid: Some(self.paid),
        }
    }

    /// Encode in the external JSON wire shape
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, AppError> {
        serde_json::to_vec(self)
            .map_err(|e| AppError::Internal(format!("Error marshaling proposal JSON: {}", e)))
    }
}

/// Payload returned when a proposal is registered for the first time
#[derive(Debug, Serialize)]
pub struct Registered {
    pub registrado: &'static str,
}

impl Registered {
    pub fn payload() -> Result<Vec<u8>, AppError> {
        serde_json::to_vec(&Registered { registrado: "true" })
            .map_err(|e| AppError::Internal(format!("Error marshaling response JSON: {}", e)))
    }
}

/// Parse a boolean argument.
///
/// Accepts `true`/`false` in any case plus the literal forms `1`, `0`,
/// `t` and `f`.
pub fn parse_bool(field: &str, raw: &str) -> Result<bool, AppError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" => Ok(true),
        "false" | "f" | "0" => Ok(false),
        _ => Err(invalid_argument(format!(
            "Failed decoding {}: '{}' is not a boolean",
            field, raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_bool_forms() {
        for raw in ["true", "TRUE", "True", "tRuE", "t", "T", "1"] {
            assert!(parse_bool("x", raw).unwrap(), "{}", raw);
        }
        for raw in ["false", "FALSE", "False", "f", "F", "0"] {
            assert!(!parse_bool("x", raw).unwrap(), "{}", raw);
        }
        for raw in ["yes", "no", "", " true", "2", "verdadeiro"] {
            assert!(matches!(parse_bool("x", raw), Err(AppError::InvalidArgument(_))), "{}", raw);
        }
    }

    #[test]
    fn test_from_args() {
        let proposal = Proposal::from_args(&args(&["P1", "12345678900", "true", "false", "0"])).unwrap();
        assert_eq!(
            proposal,
            Proposal {
                id: "P1".to_string(),
                payer_tax_id: "12345678900".to_string(),
                payer_accepted: true,
                beneficiary_accepted: false,
                paid: false,
            }
        );
    }

    #[test]
    fn test_from_args_rejects_wrong_arity() {
        assert!(Proposal::from_args(&args(&["P1", "123", "true", "false"])).is_err());
        assert!(Proposal::from_args(&args(&["P1", "123", "true", "false", "false", "x"])).is_err());
        assert!(Proposal::from_args(&[]).is_err());
    }

    #[test]
    fn test_from_args_names_the_bad_field() {
        let err = Proposal::from_args(&args(&["P1", "123", "true", "yes", "false"])).unwrap_err();
        assert!(err.to_string().contains("beneficiarioAceitou"));
    }

    #[test]
    fn test_wire_shape() {
        let proposal = Proposal::from_args(&args(&["P1", "12345678900", "true", "false", "false"])).unwrap();
        let json = String::from_utf8(proposal.to_json_bytes().unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"id_proposta":"P1","cpf_pagador":"12345678900","pagador_aceitou":true,"beneficiario_aceitou":false,"boleto_pago":false}"#
        );
    }

    #[test]
    fn test_incomplete_row_is_rejected() {
        let mut row = Proposal::from_args(&args(&["P1", "123", "1", "1", "1"])).unwrap().to_row();
        row.beneficiary_accepted = None;
        assert!(Proposal::from_row(row).is_none());
    }

    #[test]
    fn test_registered_payload() {
        assert_eq!(Registered::payload().unwrap(), br#"{"registrado":"true"}"#.to_vec());
    }
}
