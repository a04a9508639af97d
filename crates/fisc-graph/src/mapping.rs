//! Field mapping from heterogeneous source records
//!
//! Federal portals name the same thing a dozen ways (`numeroContrato`,
//! `numero_contrato`, `contrato.numero`). Each concept has an ordered alias
//! list; the first alias present in a record wins. Dotted aliases walk nested
//! objects.

use crate::canonical::{code_key, document_key, name_key, parse_amount, parse_date, text};
use chrono::NaiveDate;
use fisc_core::payload::field;
use serde_json::Value;

const CONTRACT_NUMBER: &[&str] = &[
    "numero_contrato",
    "numeroContrato",
    "contrato.numero",
    "numero",
    "contract_number",
    "id_contrato",
    "idContrato",
    "numeroControlePNCP",
];
const DESCRIPTION: &[&str] = &[
    "objeto",
    "objetoContrato",
    "objeto_compra",
    "contrato.objeto",
    "descricao",
    "description",
];
const VALUE: &[&str] = &[
    "valor_global",
    "valorGlobal",
    "valor",
    "valor_contrato",
    "valorInicial",
    "valor_inicial",
    "valorFinal",
    "contrato.valor",
    "value",
    "amount",
];
const DATE: &[&str] = &[
    "data_assinatura",
    "dataAssinatura",
    "data_inicio_vigencia",
    "dataVigenciaInicio",
    "dataPublicacao",
    "data",
    "date",
    "signed_at",
];
const CATEGORY: &[&str] = &["categoria", "category", "natureza", "tipo", "tipoContrato"];
const MODALITY: &[&str] = &["modalidade", "modalidadeCompra", "modalidade_licitacao"];

const SUPPLIER_DOCUMENT: &[&str] = &[
    "cnpj",
    "cnpj_fornecedor",
    "cnpjFornecedor",
    "cpf_cnpj",
    "cpfCnpj",
    "ni_fornecedor",
    "niFornecedor",
    "fornecedor.cnpj",
    "fornecedor.cnpjFormatado",
    "fornecedor.cpfCnpj",
    "contratado.cnpj",
    "supplier.cnpj",
];
const SUPPLIER_NAME: &[&str] = &[
    "razao_social",
    "razaoSocial",
    "nome_fornecedor",
    "nomeFornecedor",
    "fornecedor.nome",
    "fornecedor.razaoSocial",
    "contratado.nome",
    "supplier.name",
    "fornecedor",
];
const SUPPLIER_UF: &[&str] = &["uf", "fornecedor.uf", "municipio.uf", "endereco.uf"];

const AGENCY_CODE: &[&str] = &[
    "codigo_orgao",
    "codigoOrgao",
    "orgao.codigo",
    "orgao.codigoSIAFI",
    "orgaoVinculado.codigoSIAFI",
    "unidadeGestora.codigo",
    "codigo_ug",
    "ug",
    "agency.code",
];
const AGENCY_NAME: &[&str] = &[
    "nome_orgao",
    "nomeOrgao",
    "orgao.nome",
    "orgaoVinculado.nome",
    "unidadeGestora.nome",
    "agency.name",
    "orgao",
];

/// One record split into the entities it mentions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedRecord {
    pub contract: Option<ContractRecord>,
    pub supplier: Option<PartyRecord>,
    pub agency: Option<PartyRecord>,
}

impl MappedRecord {
    pub fn is_empty(&self) -> bool {
        self.contract.is_none() && self.supplier.is_none() && self.agency.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContractRecord {
    /// Canonical contract number, or a content-derived key for records without one
    pub key: String,
    pub number: Option<String>,
    pub description: Option<String>,
    pub value: Option<f64>,
    pub date: Option<NaiveDate>,
    pub category: Option<String>,
    pub modality: Option<String>,
}

/// Supplier or agency
#[derive(Debug, Clone, PartialEq)]
pub struct PartyRecord {
    pub key: String,
    pub document: Option<String>,
    pub code: Option<String>,
    pub name: Option<String>,
    pub uf: Option<String>,
}

/// Map one payload record; unrecognised records map to nothing
pub fn map_record(record: &Value) -> MappedRecord {
    if !record.is_object() {
        return MappedRecord::default();
    }
    let supplier = map_supplier(record);
    let agency = map_agency(record);
    let contract = map_contract(record, supplier.is_some() || agency.is_some());
    MappedRecord {
        contract,
        supplier,
        agency,
    }
}

fn map_contract(record: &Value, has_party: bool) -> Option<ContractRecord> {
    let number = scalar(record, CONTRACT_NUMBER);
    let value = first(record, VALUE).and_then(parse_amount);
    let key = match number.as_ref().and_then(|n| code_key(&Value::from(n.as_str()))) {
        Some(key) => key,
        // A valued record tied to a party is still a contract
        None if value.is_some() && has_party => anonymous_key(record),
        None => return None,
    };

    Some(ContractRecord {
        key,
        number,
        description: scalar(record, DESCRIPTION),
        value,
        date: first(record, DATE).and_then(parse_date),
        category: scalar(record, CATEGORY),
        modality: scalar(record, MODALITY),
    })
}

fn map_supplier(record: &Value) -> Option<PartyRecord> {
    let document = first(record, SUPPLIER_DOCUMENT).and_then(document_key);
    let name = scalar(record, SUPPLIER_NAME);
    let key = match (&document, &name) {
        (Some(doc), _) => doc.clone(),
        (None, Some(n)) => format!("NOME:{}", name_key(&Value::from(n.as_str()))?),
        (None, None) => return None,
    };
    Some(PartyRecord {
        key,
        document,
        code: None,
        name,
        uf: scalar(record, SUPPLIER_UF).map(|uf| uf.to_uppercase()),
    })
}

fn map_agency(record: &Value) -> Option<PartyRecord> {
    let code = first(record, AGENCY_CODE).and_then(code_key);
    let name = scalar(record, AGENCY_NAME);
    let key = match (&code, &name) {
        (Some(code), _) => code.clone(),
        (None, Some(n)) => format!("NOME:{}", name_key(&Value::from(n.as_str()))?),
        (None, None) => return None,
    };
    Some(PartyRecord {
        key,
        document: None,
        code,
        name,
        uf: None,
    })
}

/// First alias holding a scalar value
fn first<'v>(record: &'v Value, aliases: &[&str]) -> Option<&'v Value> {
    aliases
        .iter()
        .filter_map(|alias| field(record, alias))
        .find(|v| v.is_string() || v.is_number())
}

fn scalar(record: &Value, aliases: &[&str]) -> Option<String> {
    first(record, aliases).and_then(text)
}

/// Stable key for a contract record without a number
fn anonymous_key(record: &Value) -> String {
    let hash = blake3::hash(record.to_string().as_bytes()).to_hex();
    format!("ANON{}", &hash[..16]).to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flat_contract_record() {
        let mapped = map_record(&json!({
            "numero_contrato": "ct-12/2024",
            "objeto": "Aquisição de medicamentos",
            "valor_global": "R$ 1.250.000,00",
            "data_assinatura": "10/02/2024",
            "modalidade": "Pregão",
            "cnpj_fornecedor": "11.222.333/0001-81",
            "razao_social": "Farma Brasil Ltda",
            "codigo_orgao": "26000",
            "nome_orgao": "Ministério da Saúde"
        }));

        let contract = mapped.contract.unwrap();
        assert_eq!(contract.key, "CT122024");
        assert_eq!(contract.value, Some(1_250_000.0));
        assert_eq!(contract.date, NaiveDate::from_ymd_opt(2024, 2, 10));
        assert_eq!(contract.modality.as_deref(), Some("Pregão"));

        let supplier = mapped.supplier.unwrap();
        assert_eq!(supplier.key, "11222333000181");
        assert_eq!(supplier.name.as_deref(), Some("Farma Brasil Ltda"));

        let agency = mapped.agency.unwrap();
        assert_eq!(agency.key, "26000");
        assert_eq!(agency.name.as_deref(), Some("Ministério da Saúde"));
    }

    #[test]
    fn test_nested_record() {
        let mapped = map_record(&json!({
            "numeroContrato": "00045/2023",
            "valorInicial": 98000.5,
            "fornecedor": { "cnpjFormatado": "11222333000181", "nome": "Construtora X" },
            "orgao": { "codigo": "36000", "nome": "Ministério da Saúde" }
        }));
        assert_eq!(mapped.contract.unwrap().key, "000452023");
        assert_eq!(mapped.supplier.unwrap().name.as_deref(), Some("Construtora X"));
        assert_eq!(mapped.agency.unwrap().key, "36000");
    }

    #[test]
    fn test_supplier_only_record() {
        let mapped = map_record(&json!({
            "cnpj": "11222333000181",
            "razao_social": "Farma Brasil Ltda",
            "uf": "mg"
        }));
        assert!(mapped.contract.is_none());
        assert!(mapped.agency.is_none());
        assert_eq!(mapped.supplier.unwrap().uf.as_deref(), Some("MG"));
    }

    #[test]
    fn test_name_keyed_parties_and_anonymous_contract() {
        let record = json!({ "valor": 500, "fornecedor": "Acme Serviços", "orgao": "MEC" });
        let mapped = map_record(&record);
        assert_eq!(mapped.supplier.as_ref().unwrap().key, "NOME:ACME SERVICOS");
        assert_eq!(mapped.agency.as_ref().unwrap().key, "NOME:MEC");
        let key = mapped.contract.unwrap().key;
        assert!(key.starts_with("ANON"));
        assert_eq!(map_record(&record).contract.unwrap().key, key);
    }

    #[test]
    fn test_unrecognised_records_map_to_nothing() {
        assert!(map_record(&json!({ "populacao": 21000000 })).is_empty());
        assert!(map_record(&json!("texto")).is_empty());
        assert!(map_record(&json!({ "valor": 10 })).is_empty());
    }
}
