//! Client records derived from a proposal payload.
//!
//! A proposal names a titular proponent (`*_proponente` keys) and may name a
//! second one (`*_segundo` keys). Each proponent with a name and a document is
//! stored as its own client; the payload itself becomes the client's `data`.

use super::clients::ClientInput;
use serde_json::{Map, Value};

type Payload = Map<String, Value>;

/// Flags that describe the link to a second person. Cleared on records that
/// must stand alone.
const LINK_FLAGS: &[&str] = &[
    "has_segundo",
    "tipo_conjuge",
    "tipo_segundo_proponente",
    "tipo_procurador",
];

/// Keys dropped from the titular's record along with every `*_segundo` key.
const SECOND_PERSON_KEYS: &[&str] = &[
    "has_segundo",
    "tipo_segundo",
    "salvar_vinculo_segundo",
    "sexo_seg",
];

/// Titular field → the second proponent's field holding the same datum.
const SECOND_PROPONENT_FIELDS: &[(&str, &str)] = &[
    ("nome_proponente", "nome_segundo"),
    ("cpf_cnpj_proponente", "cpf_cnpj_segundo"),
    ("rg_proponente", "rg_segundo"),
    ("orgao_emissor_proponente", "orgao_emissor_segundo"),
    ("data_nascimento_proponente", "data_nascimento_segundo"),
    ("sexo", "sexo_seg"),
    ("naturalidade_proponente", "naturalidade_segundo"),
    ("uf_naturalidade_proponente", "uf_naturalidade_segundo"),
    ("nacionalidade_proponente", "nacionalidade_segundo"),
    ("estado_civil_proponente", "estado_civil_segundo"),
    ("regime_casamento_proponente", "regime_casamento_segundo"),
    ("profissao_proponente", "profissao_segundo"),
    ("local_trabalho_proponente", "local_trabalho_segundo"),
    ("email_proponente", "email_segundo"),
    ("fone1_ddd_proponente", "fone1_ddd_segundo"),
    ("fone1_numero_proponente", "fone1_numero_segundo"),
    ("fone2_ddd_proponente", "fone2_ddd_segundo"),
    ("fone2_numero_proponente", "fone2_numero_segundo"),
    ("fone_comercial_ddd_proponente", "fone_comercial_ddd_segundo"),
    ("fone_comercial_numero_proponente", "fone_comercial_numero_segundo"),
    ("endereco_residencial_proponente", "endereco_residencial_segundo"),
    ("numero_endereco_proponente", "numero_endereco_segundo"),
    ("bairro_proponente", "bairro_segundo"),
    ("cidade_proponente", "cidade_segundo"),
    ("uf_endereco_proponente", "uf_endereco_segundo"),
    ("cep_proponente", "cep_segundo"),
    ("tipo_pessoa", "tipo_pessoa_segundo"),
];

/// JSON truthiness: false, null, zero and empty values are unset.
fn is_set(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

fn clear_link_flags(record: &mut Payload) {
    for flag in LINK_FLAGS {
        record.insert(flag.to_string(), Value::Bool(false));
    }
}

/// The titular's record. Second-person keys are stripped unless the payload
/// asks to keep the link (`salvar_vinculo_segundo`).
pub(crate) fn titular_record(payload: &Payload) -> Payload {
    if is_set(payload.get("salvar_vinculo_segundo")) {
        return payload.clone();
    }
    let mut record: Payload = payload
        .iter()
        .filter(|(key, _)| !key.contains("_segundo") && !SECOND_PERSON_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    clear_link_flags(&mut record);
    record
}

/// The second proponent as a standalone record, with its fields moved into
/// the titular slots. `None` unless `has_segundo` is set and the second
/// proponent has both a name and a document.
pub(crate) fn second_proponent_record(payload: &Payload) -> Option<Payload> {
    let has_name = is_set(payload.get("nome_segundo")) || is_set(payload.get("razao_social_segundo"));
    if !is_set(payload.get("has_segundo")) || !has_name || !is_set(payload.get("cpf_cnpj_segundo")) {
        return None;
    }

    let mut record = payload.clone();
    for (titular_key, second_key) in SECOND_PROPONENT_FIELDS {
        let titular = payload.get(*titular_key).cloned().unwrap_or(Value::Null);
        let second = payload.get(*second_key).cloned().unwrap_or(Value::Null);
        record.insert(titular_key.to_string(), second);
        record.insert(second_key.to_string(), titular);
    }
    clear_link_flags(&mut record);

    if payload.get("tipo_pessoa_segundo").and_then(Value::as_str) == Some("PJ") {
        let razao_social = payload.get("razao_social_segundo").cloned().unwrap_or(Value::Null);
        record.insert("nome_proponente".to_string(), razao_social);
    }
    Some(record)
}

/// Client fields for one proponent record, or `None` when its name or
/// document is missing.
pub(crate) fn contact_input(record: Payload, created_by: Option<i64>) -> Option<ClientInput> {
    let text = |key: &str| {
        record
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let nome = text("nome_proponente")?;
    let cpf_cnpj = text("cpf_cnpj_proponente")?;
    Some(ClientInput {
        nome,
        cpf_cnpj,
        data: Value::Object(record),
        created_by,
    })
}
