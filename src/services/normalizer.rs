//! Flattens analyzer output into [`NormalizedInvoice`].
//!
//! Every logical field is looked up through an ordered list of keys, so schema
//! changes between analyzer versions only add entries to the tables below.

use crate::types::{LineItem, Money, NormalizedInvoice};
use serde_json::{Map, Value};
use tracing::debug;

enum Step {
    Key(&'static str),
    Index(usize),
}

use Step::{Index, Key};

/// Where the `fields` object lives, by service and API version.
const FIELD_CONTAINERS: &[&[Step]] = &[
    &[Key("fields")],
    &[Key("result"), Key("fields")],
    &[Key("contents"), Index(0), Key("fields")],
    &[Key("result"), Key("contents"), Index(0), Key("fields")],
    &[Key("documents"), Index(0), Key("fields")],
    &[Key("analyzeResult"), Key("documents"), Index(0), Key("fields")],
    &[Key("result"), Key("documents"), Index(0), Key("fields")],
];

const VENDOR_KEYS: &[&str] = &[
    "VendorName",
    "Vendor",
    "SellerName",
    "VendorAddressRecipient",
    "vendorName",
    "vendor",
];
const INVOICE_NUMBER_KEYS: &[&str] = &["InvoiceId", "InvoiceNumber", "invoiceId", "invoiceNumber"];
const DUE_DATE_KEYS: &[&str] = &["DueDate", "PaymentDueDate", "dueDate"];
const TOTAL_KEYS: &[&str] = &["InvoiceTotal", "Total", "AmountDue", "TotalAmount", "total"];
const LINE_ITEM_KEYS: &[&str] = &["Items", "LineItems", "lineItems", "items"];

const ITEM_DESCRIPTION_KEYS: &[&str] = &["Description", "ProductDescription", "Name", "description"];
const ITEM_QUANTITY_KEYS: &[&str] = &["Quantity", "quantity"];
const ITEM_UNIT_PRICE_KEYS: &[&str] = &["UnitPrice", "unitPrice"];
const ITEM_AMOUNT_KEYS: &[&str] = &["Amount", "TotalPrice", "TotalAmount", "LineTotal", "amount"];

const TEXT_VALUE_KEYS: &[&str] = &["valueString", "value", "valueDate", "content"];
const DATE_VALUE_KEYS: &[&str] = &["valueDate", "value", "valueString", "content"];
const NUMBER_VALUE_KEYS: &[&str] = &["valueNumber", "valueInteger", "value", "content"];
const CURRENCY_CODE_KEYS: &[&str] = &["currencyCode", "currency", "CurrencyCode"];

/// Never fails: anything that does not match the expected shape is reported as absent.
pub fn normalize(raw: &Value) -> NormalizedInvoice {
    let Some(fields) = fields_container(raw) else {
        debug!("No fields container in analyzer result");
        return NormalizedInvoice::default();
    };

    NormalizedInvoice {
        vendor: first_match(fields, VENDOR_KEYS, text),
        invoice_number: first_match(fields, INVOICE_NUMBER_KEYS, identifier),
        due_date: first_match(fields, DUE_DATE_KEYS, date),
        total: first_match(fields, TOTAL_KEYS, money),
        line_items: line_items(fields),
    }
}

fn follow<'a>(mut value: &'a Value, path: &[Step]) -> Option<&'a Value> {
    for step in path {
        value = match step {
            Key(key) => value.get(*key)?,
            Index(i) => value.get(*i)?,
        };
    }
    Some(value)
}

fn fields_container(raw: &Value) -> Option<&Map<String, Value>> {
    FIELD_CONTAINERS
        .iter()
        .find_map(|path| follow(raw, path).and_then(Value::as_object))
}

fn first_match<T>(
    fields: &Map<String, Value>,
    keys: &[&str],
    extract: fn(&Value) -> Option<T>,
) -> Option<T> {
    keys.iter().find_map(|key| fields.get(*key).and_then(extract))
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn string_under(field: &Value, keys: &[&str]) -> Option<String> {
    match field {
        Value::String(s) => non_empty(s),
        Value::Object(obj) => keys
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_str).and_then(non_empty)),
        _ => None,
    }
}

fn text(field: &Value) -> Option<String> {
    string_under(field, TEXT_VALUE_KEYS)
}

fn date(field: &Value) -> Option<String> {
    string_under(field, DATE_VALUE_KEYS)
}

/// Invoice numbers sometimes come back as integers.
fn identifier(field: &Value) -> Option<String> {
    fn integer(v: &Value) -> Option<String> {
        v.as_i64()
            .map(|n| n.to_string())
            .or_else(|| v.as_u64().map(|n| n.to_string()))
    }

    text(field).or_else(|| match field {
        Value::Object(obj) => TEXT_VALUE_KEYS
            .iter()
            .chain(["valueNumber", "valueInteger"].iter())
            .find_map(|key| obj.get(*key).and_then(integer)),
        other => integer(other),
    })
}

/// Finite number from a JSON number or a numeric string.
fn number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn quantity(field: &Value) -> Option<f64> {
    match field {
        Value::Object(obj) => NUMBER_VALUE_KEYS
            .iter()
            .find_map(|key| obj.get(*key).and_then(number)),
        other => number(other),
    }
}

fn currency_code(obj: &Map<String, Value>) -> Option<String> {
    CURRENCY_CODE_KEYS
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str).and_then(non_empty))
}

/// `{amount, currencyCode}` as used by `valueCurrency`.
fn amount_with_code(obj: &Map<String, Value>) -> Option<Money> {
    let value = obj.get("amount").and_then(number)?;
    Some(Money {
        value,
        currency: currency_code(obj),
    })
}

fn money(field: &Value) -> Option<Money> {
    let obj = match field {
        Value::Object(obj) => obj,
        other => {
            return number(other).map(|value| Money {
                value,
                currency: None,
            })
        }
    };

    if let Some(m) = obj
        .get("valueCurrency")
        .and_then(Value::as_object)
        .and_then(amount_with_code)
    {
        return Some(m);
    }

    // Content Understanding: {"valueObject": {"Amount": {...}, "CurrencyCode": {...}}}
    if let Some(inner) = obj.get("valueObject").and_then(Value::as_object) {
        let amount = ["Amount", "amount"]
            .iter()
            .find_map(|key| inner.get(*key).and_then(quantity));
        if let Some(value) = amount {
            let currency = ["CurrencyCode", "currencyCode", "Currency"]
                .iter()
                .find_map(|key| inner.get(*key).and_then(text))
                .or_else(|| currency_code(obj));
            return Some(Money { value, currency });
        }
    }

    match obj.get("value") {
        Some(Value::Object(inner)) => {
            if let Some(m) = amount_with_code(inner) {
                return Some(m);
            }
        }
        Some(v) => {
            if let Some(value) = number(v) {
                return Some(Money {
                    value,
                    currency: currency_code(obj),
                });
            }
        }
        None => {}
    }

    ["valueNumber", "amount"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(number))
        .map(|value| Money {
            value,
            currency: currency_code(obj),
        })
}

fn item_array(field: &Value) -> Option<&Vec<Value>> {
    match field {
        Value::Array(items) => Some(items),
        Value::Object(obj) => ["valueArray", "value"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_array)),
        _ => None,
    }
}

fn line_item(item: &Value) -> Option<LineItem> {
    let obj = ["valueObject", "value"]
        .iter()
        .find_map(|key| item.get(*key).and_then(Value::as_object))
        .or_else(|| item.as_object())?;

    let line = LineItem {
        description: first_match(obj, ITEM_DESCRIPTION_KEYS, text),
        quantity: first_match(obj, ITEM_QUANTITY_KEYS, quantity),
        unit_price: first_match(obj, ITEM_UNIT_PRICE_KEYS, money),
        amount: first_match(obj, ITEM_AMOUNT_KEYS, money),
    };
    (!line.is_empty()).then_some(line)
}

fn line_items(fields: &Map<String, Value>) -> Vec<LineItem> {
    let Some(items) = LINE_ITEM_KEYS
        .iter()
        .find_map(|key| fields.get(*key).and_then(item_array))
    else {
        return Vec::new();
    };
    let lines: Vec<LineItem> = items.iter().filter_map(line_item).collect();
    if lines.len() < items.len() {
        debug!(
            skipped = items.len() - lines.len(),
            "Skipped line items with no recognizable fields"
        );
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn usd(value: f64) -> Option<Money> {
        Some(Money {
            value,
            currency: Some("USD".to_string()),
        })
    }

    #[test]
    fn flat_fields_with_value_and_currency() {
        let raw = json!({
            "fields": {
                "VendorName": {"value": "Acme Co"},
                "Total": {"value": 42.5, "currency": "USD"}
            }
        });
        let invoice = normalize(&raw);
        assert_eq!(invoice.vendor.as_deref(), Some("Acme Co"));
        assert_eq!(invoice.total, usd(42.5));
        assert!(invoice.invoice_number.is_none());
        assert!(invoice.due_date.is_none());
        assert!(invoice.line_items.is_empty());
        assert_eq!(
            serde_json::to_value(&invoice).unwrap(),
            json!({"vendor": "Acme Co", "total": {"value": 42.5, "currency": "USD"}})
        );
    }

    #[test]
    fn document_intelligence_shape() {
        let raw = json!({
            "status": "succeeded",
            "analyzeResult": {
                "documents": [{
                    "fields": {
                        "VendorName": {"type": "string", "valueString": "Contoso Ltd.", "content": "CONTOSO LTD."},
                        "InvoiceId": {"type": "string", "valueString": "INV-100"},
                        "DueDate": {"type": "date", "valueDate": "2019-12-15", "content": "12/15/2019"},
                        "InvoiceTotal": {"type": "currency", "valueCurrency": {"amount": 110.0, "currencyCode": "USD"}},
                        "Items": {
                            "type": "array",
                            "valueArray": [{
                                "type": "object",
                                "valueObject": {
                                    "Description": {"type": "string", "valueString": "Consulting Services"},
                                    "Quantity": {"type": "number", "valueNumber": 2},
                                    "UnitPrice": {"type": "currency", "valueCurrency": {"amount": 30.0, "currencyCode": "USD"}},
                                    "Amount": {"type": "currency", "valueCurrency": {"amount": 60.0, "currencyCode": "USD"}}
                                }
                            }]
                        }
                    }
                }]
            }
        });
        let invoice = normalize(&raw);
        assert_eq!(invoice.vendor.as_deref(), Some("Contoso Ltd."));
        assert_eq!(invoice.invoice_number.as_deref(), Some("INV-100"));
        assert_eq!(invoice.due_date.as_deref(), Some("2019-12-15"));
        assert_eq!(invoice.total, usd(110.0));
        assert_eq!(
            invoice.line_items,
            vec![LineItem {
                description: Some("Consulting Services".into()),
                quantity: Some(2.0),
                unit_price: usd(30.0),
                amount: usd(60.0),
            }]
        );
    }

    #[test]
    fn content_understanding_shape() {
        let raw = json!({
            "result": {
                "analyzerId": "prebuilt-invoice",
                "contents": [{
                    "markdown": "# INVOICE",
                    "fields": {
                        "VendorName": {"type": "string", "valueString": "Fabrikam"},
                        "InvoiceId": {"type": "string", "valueString": "F-7"},
                        "TotalAmount": {
                            "type": "object",
                            "valueObject": {
                                "Amount": {"type": "number", "valueNumber": 99.9},
                                "CurrencyCode": {"type": "string", "valueString": "EUR"}
                            }
                        },
                        "LineItems": {
                            "type": "array",
                            "valueArray": [{
                                "type": "object",
                                "valueObject": {
                                    "Description": {"type": "string", "valueString": "Widget"},
                                    "TotalAmount": {"type": "object", "valueObject": {"Amount": {"valueNumber": 99.9}}}
                                }
                            }]
                        }
                    }
                }]
            }
        });
        let invoice = normalize(&raw);
        assert_eq!(invoice.vendor.as_deref(), Some("Fabrikam"));
        assert_eq!(invoice.invoice_number.as_deref(), Some("F-7"));
        assert_eq!(
            invoice.total,
            Some(Money {
                value: 99.9,
                currency: Some("EUR".into())
            })
        );
        assert_eq!(invoice.line_items.len(), 1);
        assert_eq!(invoice.line_items[0].description.as_deref(), Some("Widget"));
        assert_eq!(
            invoice.line_items[0].amount,
            Some(Money {
                value: 99.9,
                currency: None
            })
        );
    }

    #[test]
    fn bare_number_total_has_no_currency() {
        let invoice = normalize(&json!({"fields": {"InvoiceTotal": 12}}));
        assert_eq!(
            invoice.total,
            Some(Money {
                value: 12.0,
                currency: None
            })
        );
        let invoice = normalize(&json!({"fields": {"Total": {"valueNumber": 7.25}}}));
        assert_eq!(
            invoice.total,
            Some(Money {
                value: 7.25,
                currency: None
            })
        );
    }

    #[test]
    fn numeric_strings_are_accepted_for_amounts() {
        let invoice = normalize(&json!({"fields": {"Total": {"value": " 42.50 ", "currencyCode": "GBP"}}}));
        assert_eq!(
            invoice.total,
            Some(Money {
                value: 42.5,
                currency: Some("GBP".into())
            })
        );
    }

    #[test]
    fn null_missing_and_mismatched_fields_are_absent() {
        let raw = json!({
            "fields": {
                "VendorName": null,
                "InvoiceId": {"valueString": ["not", "a", "string"]},
                "DueDate": 20240101.5,
                "Total": {"value": "forty-two"},
                "Items": "none"
            }
        });
        assert_eq!(normalize(&raw), NormalizedInvoice::default());
    }

    #[test]
    fn missing_field_leaves_others_populated() {
        let raw = json!({
            "fields": {
                "InvoiceId": {"valueString": "A-1"},
                "DueDate": {"valueDate": "2024-05-01"},
                "InvoiceTotal": {"valueCurrency": {"amount": 5, "currencyCode": "USD"}}
            }
        });
        let invoice = normalize(&raw);
        assert!(invoice.vendor.is_none());
        assert_eq!(invoice.invoice_number.as_deref(), Some("A-1"));
        assert_eq!(invoice.due_date.as_deref(), Some("2024-05-01"));
        assert_eq!(invoice.total, usd(5.0));
    }

    #[test]
    fn later_key_used_when_earlier_key_is_unusable() {
        let raw = json!({
            "fields": {
                "VendorName": {"valueString": "   "},
                "SellerName": {"content": "Northwind"}
            }
        });
        assert_eq!(normalize(&raw).vendor.as_deref(), Some("Northwind"));
    }

    #[test]
    fn integer_invoice_number_is_stringified() {
        let invoice = normalize(&json!({"fields": {"InvoiceNumber": {"value": 123456}}}));
        assert_eq!(invoice.invoice_number.as_deref(), Some("123456"));
    }

    #[test]
    fn first_recognized_line_item_key_wins() {
        let raw = json!({
            "fields": {
                "Items": {"valueArray": [{"valueObject": {"Description": {"valueString": "from Items"}}}]},
                "lineItems": [{"description": "from lineItems"}]
            }
        });
        let invoice = normalize(&raw);
        assert_eq!(invoice.line_items.len(), 1);
        assert_eq!(invoice.line_items[0].description.as_deref(), Some("from Items"));
    }

    #[test]
    fn malformed_line_items_are_skipped() {
        let raw = json!({
            "fields": {
                "lineItems": [
                    "just text",
                    {"description": "Paper", "quantity": "3", "unitPrice": 1.5, "amount": 4.5},
                    {"unexpected": true},
                    null
                ]
            }
        });
        let invoice = normalize(&raw);
        assert_eq!(
            invoice.line_items,
            vec![LineItem {
                description: Some("Paper".into()),
                quantity: Some(3.0),
                unit_price: Some(Money {
                    value: 1.5,
                    currency: None
                }),
                amount: Some(Money {
                    value: 4.5,
                    currency: None
                }),
            }]
        );
    }

    #[test]
    fn missing_container_yields_empty_invoice() {
        assert_eq!(normalize(&json!({})), NormalizedInvoice::default());
        assert_eq!(normalize(&json!(null)), NormalizedInvoice::default());
        assert_eq!(normalize(&json!({"fields": [1, 2]})), NormalizedInvoice::default());
        assert_eq!(
            normalize(&json!({"result": {"contents": []}})),
            NormalizedInvoice::default()
        );
    }

    #[test]
    fn extra_fields_are_ignored() {
        let raw = json!({
            "fields": {
                "VendorName": {"value": "Acme Co", "confidence": 0.98, "spans": [{"offset": 0}]},
                "CustomerName": {"valueString": "Someone Else"},
                "TaxDetails": {"valueArray": []}
            },
            "pages": [{"lines": []}]
        });
        let invoice = normalize(&raw);
        assert_eq!(invoice.vendor.as_deref(), Some("Acme Co"));
        assert!(invoice.total.is_none());
    }
}
