use chrono::{Datelike, Utc};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use uuid::Uuid;

use windledger_api::config::ApiConfig;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(ApiConfig::default()).await
    }

    async fn spawn_with(config: ApiConfig) -> Self {
        // Same router as prod, bound to an ephemeral port.
        let app = windledger_api::app::build_app(config);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Gateway identity headers for one user of one tenant.
#[derive(Clone)]
struct Caller {
    tenant: Uuid,
    user: Uuid,
}

impl Caller {
    fn new(tenant: Uuid) -> Self {
        Self {
            tenant,
            user: Uuid::now_v7(),
        }
    }

    fn post(&self, client: &reqwest::Client, url: String) -> reqwest::RequestBuilder {
        client
            .post(url)
            .header("x-tenant-id", self.tenant.to_string())
            .header("x-user-id", self.user.to_string())
    }

    fn get(&self, client: &reqwest::Client, url: String) -> reqwest::RequestBuilder {
        client
            .get(url)
            .header("x-tenant-id", self.tenant.to_string())
            .header("x-user-id", self.user.to_string())
    }
}

/// Amounts travel as decimal strings; compare by value, not by scale.
fn amount(v: &Value) -> Decimal {
    v.as_str()
        .unwrap_or_else(|| panic!("expected decimal string, got {v}"))
        .parse()
        .unwrap()
}

fn calculation_body() -> Value {
    json!({
        "park": {
            "park_id": Uuid::now_v7(),
            "park_name": "Windpark Heideblick",
            "revenue_share_percent": "8"
        },
        "period": { "year": 2026, "month": null, "period_type": "FINAL" },
        "leases": [
            {
                "lease_id": Uuid::now_v7(),
                "lessor_id": Uuid::now_v7(),
                "lessor_name": "Hof Brandt",
                "minimum_rent_per_unit": "5000",
                "units": "1",
                "advances_paid": "5000"
            }
        ],
        "revenue": { "metered": [ { "source": "EEG", "amount": "100000" } ] }
    })
}

fn invoice_body() -> Value {
    json!({
        "recipient": { "name": "Stadtwerke Musterstadt", "email": "rechnung@stadtwerke.example" },
        "invoice_date": Utc::now().date_naive(),
        "items": [
            { "description": "Betriebsfuehrung", "quantity": "10", "unit_price": "100", "tax_type": "STANDARD" }
        ]
    })
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn context_headers_are_required() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(srv.url("/whoami"))
        .header("x-tenant-id", Uuid::now_v7().to_string())
        .header("x-user-id", "someone")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let caller = Caller::new(Uuid::now_v7());
    let res = caller.get(&client, srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["tenant_id"], caller.tenant.to_string());
}

#[tokio::test]
async fn settlement_review_enforces_four_eyes() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let tenant = Uuid::now_v7();
    let preparer = Caller::new(tenant);
    let reviewer = Caller::new(tenant);

    let res = preparer
        .post(&client, srv.url("/settlements/calculate"))
        .json(&calculation_body())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let settlement: Value = res.json().await.unwrap();
    let id = settlement["id"].as_str().unwrap().to_string();
    assert_eq!(settlement["status"], "CALCULATED");
    assert_eq!(settlement["calculation"]["used_minimum"], false);
    assert_eq!(amount(&settlement["calculation"]["calculated_fee"]), dec!(8000));
    assert_eq!(amount(&settlement["items"][0]["balance"]), dec!(3000));

    // Approving before submission is a status conflict with detail.
    let res = reviewer
        .post(&client, srv.url(&format!("/settlements/{id}/review")))
        .json(&json!({ "action": "approve" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["current"], "CALCULATED");

    let res = preparer
        .post(&client, srv.url(&format!("/settlements/{id}/review")))
        .json(&json!({ "action": "submit", "notes": "bitte pruefen" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = preparer
        .post(&client, srv.url(&format!("/settlements/{id}/review")))
        .json(&json!({ "action": "approve" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["error"], "self_approval_forbidden");

    let res = reviewer
        .post(&client, srv.url(&format!("/settlements/{id}/review")))
        .json(&json!({ "action": "approve" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = reviewer
        .post(&client, srv.url(&format!("/settlements/{id}/credit-notes")))
        .json(&json!({ "document_date": "2026-01-31" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["settlement"]["status"], "SETTLED");
    // Numbered in the issue year, not the document's.
    let issued = format!("GS-{}-0001", Utc::now().year());
    assert_eq!(body["credit_notes"][0]["number"], issued.as_str());
    assert_eq!(amount(&body["credit_notes"][0]["gross_amount"]), dec!(-3000));

    // Other tenants cannot see the settlement.
    let stranger = Caller::new(Uuid::now_v7());
    let res = stranger
        .get(&client, srv.url(&format!("/settlements/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invoice_lifecycle_and_cancellation() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let caller = Caller::new(Uuid::now_v7());
    let year = Utc::now().year();

    let res = caller
        .post(&client, srv.url("/invoices"))
        .json(&invoice_body())
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let invoice: Value = res.json().await.unwrap();
    let id = invoice["id"].as_str().unwrap().to_string();
    assert_eq!(invoice["number"], format!("RG-{year}-0001"));
    assert_eq!(invoice["status"], "DRAFT");
    assert_eq!(amount(&invoice["gross_amount"]), dec!(1190));

    let res = caller
        .post(&client, srv.url("/invoices/send"))
        .json(&json!({ "invoice_ids": [id, Uuid::now_v7()] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let batch: Value = res.json().await.unwrap();
    assert_eq!(batch["sent"], 1);
    assert_eq!(batch["failed"], 1);
    assert_eq!(batch["results"][1]["error"]["error"], "not_found");

    let res = caller
        .post(&client, srv.url(&format!("/invoices/{id}/partial-cancel")))
        .json(&json!({ "positions": [ { "position": 1, "quantity": "20" } ], "reason": "zu viel" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["error"], "quantity_exceeds_original");
    assert_eq!(amount(&err["available"]), dec!(10));

    let res = caller
        .post(&client, srv.url(&format!("/invoices/{id}/cancel")))
        .json(&json!({ "reason": "falscher Empfaenger" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let outcome: Value = res.json().await.unwrap();
    assert_eq!(outcome["original"]["status"], "CANCELLED");
    assert_eq!(outcome["credit_note"]["number"], format!("GS-{year}-0001"));
    assert_eq!(amount(&outcome["credit_note"]["gross_amount"]), dec!(-1190));

    let res = caller
        .post(&client, srv.url(&format!("/invoices/{id}/paid")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = caller
        .get(&client, srv.url("/invoices/not-a-uuid"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bank_import_checks_extension_and_matches_invoices() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let caller = Caller::new(Uuid::now_v7());

    let invoice: Value = caller
        .post(&client, srv.url("/invoices"))
        .json(&invoice_body())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = invoice["id"].as_str().unwrap().to_string();
    let number = invoice["number"].as_str().unwrap().to_string();
    caller
        .post(&client, srv.url("/invoices/send"))
        .json(&json!({ "invoice_ids": [id] }))
        .send()
        .await
        .unwrap();

    let statement = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Document xmlns=\"urn:iso:std:iso:20022:tech:xsd:camt.053.001.02\"><BkToCstmrStmt><Stmt>\
         <Ntry><Amt Ccy=\"EUR\">1190.00</Amt><CdtDbtInd>CRDT</CdtDbtInd>\
         <ValDt><Dt>2026-03-20</Dt></ValDt>\
         <NtryDtls><TxDtls><RltdPties><Dbtr><Nm>Stadtwerke Musterstadt</Nm></Dbtr></RltdPties>\
         <RmtInf><Ustrd>{number}</Ustrd></RmtInf></TxDtls></NtryDtls></Ntry>\
         </Stmt></BkToCstmrStmt></Document>"
    );

    let upload = |name: &str| {
        reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::text(statement.clone()).file_name(name.to_string()),
        )
    };

    let res = caller
        .post(&client, srv.url("/bank-imports"))
        .multipart(upload("auszug.pdf"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["error"], "unsupported_file_type");

    let res = caller
        .post(&client, srv.url("/bank-imports"))
        .multipart(upload("auszug.xml"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let report: Value = res.json().await.unwrap();
    assert_eq!(report["format"], "CAMT053");
    assert_eq!(report["transaction_count"], 1);
    assert_eq!(report["matches"][0]["confidence"], "high");
    assert_eq!(report["matches"][0]["candidates"][0]["number"], number);
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let config = ApiConfig {
        max_upload_bytes: 64,
        ..ApiConfig::default()
    };
    let srv = TestServer::spawn_with(config).await;
    let client = reqwest::Client::new();
    let caller = Caller::new(Uuid::now_v7());

    let form = reqwest::multipart::Form::new().part(
        "file",
        reqwest::multipart::Part::text(":20:X\n".repeat(100)).file_name("auszug.sta"),
    );
    let res = caller
        .post(&client, srv.url("/bank-imports"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
