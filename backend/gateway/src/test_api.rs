use std::sync::Arc;

use alloy_primitives::{Address, B256, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use brickfi_client::contracts::{IStablecoin, ITokenizer};
use brickfi_client::testutils::{word, word_address, MockChain};
use brickfi_client::units::whole_tokens;
use brickfi_client::{Deployment, Phase, Project, ReadCache, Reader};
use chrono::{Duration, SecondsFormat, Utc};
use serde_json::Value;

use crate::api::{self, ApiState, InvestPlanQuery, ProjectQuery, VerifyRequest};
use crate::auth::{AllowListPolicy, SessionStore};
use crate::db;
use crate::errors::{GatewayError, Result};
use crate::upload::{ImageUpload, PinningService};

const POOL_A: Address = Address::repeat_byte(0xa1);
const POOL_B: Address = Address::repeat_byte(0xa2);
const INVESTOR: Address = Address::repeat_byte(0x11);

struct FakePinning {
    fail: bool,
}

#[async_trait]
impl PinningService for FakePinning {
    async fn pin(&self, upload: &ImageUpload) -> Result<String> {
        if self.fail {
            return Err(GatewayError::Upload("pinata down".to_string()));
        }
        Ok(format!("bafy{}", upload.bytes.len()))
    }
}

async fn state(
    mock: Arc<MockChain>,
    pinning: Option<Arc<dyn PinningService>>,
    admins: Vec<Address>,
) -> Arc<ApiState> {
    state_with_cache(mock, pinning, admins, ReadCache::new()).await
}

async fn state_with_cache(
    mock: Arc<MockChain>,
    pinning: Option<Arc<dyn PinningService>>,
    admins: Vec<Address>,
    cache: ReadCache,
) -> Arc<ApiState> {
    Arc::new(ApiState {
        pool: db::connect("sqlite::memory:", 1).await.unwrap(),
        reader: Reader::new(mock, cache, Deployment::default()),
        pinning,
        sessions: SessionStore::new(3600),
        admins: Arc::new(AllowListPolicy::new(admins)),
        siwe_domain: Some("brickfi.app".to_string()),
        max_projects: 5,
    })
}

async fn read(resp: Response) -> (StatusCode, Value) {
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn multipart(field: &str, file_name: &str, content_type: &str, data: &str) -> Multipart {
    let boundary = "gatewayBoundary";
    let body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n{data}\r\n--{boundary}--\r\n"
    );
    let request = Request::builder()
        .method("POST")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();
    Multipart::from_request(request, &()).await.unwrap()
}

fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::AUTHORIZATION,
        format!("Bearer {token}").parse().unwrap(),
    );
    headers
}

fn project(address: Address, name: &str, phase: Phase) -> Project {
    let now = Utc::now().timestamp() as u64;
    Project {
        address,
        owner: Address::repeat_byte(0x01),
        name: name.to_string(),
        total_fractions: whole_tokens(1_000_000, 18),
        soft_cap: whole_tokens(800_000, 18),
        start_time: now - 86_400,
        buying_period_end: now + 7 * 86_400,
        max_repayment_time: now + 180 * 86_400,
        possible_return: 12,
        url: format!("https://gateway.pinata.cloud/ipfs/{name}"),
        kyc_hash: B256::repeat_byte(0x0c),
        total_sold: whole_tokens(250_000, 18),
        total_reinvested: U256::ZERO,
        actual_repayment_time: 0,
        phase,
    }
}

fn list_factory(mock: &MockChain, pools: &[Address]) {
    let factory = Deployment::default().tokenizer.address;
    for (i, pool) in pools.iter().enumerate() {
        mock.respond(
            factory,
            ITokenizer::createdInstancesCall { index: i as u128 },
            word_address(*pool),
        );
    }
}

fn sign_in_message(signer: &PrivateKeySigner, nonce: &str) -> String {
    let now = Utc::now();
    format!(
        "brickfi.app wants you to sign in with your Ethereum account:\n\
         {}\n\
         \n\
         Sign in to BrickFi\n\
         \n\
         URI: https://brickfi.app\n\
         Version: 1\n\
         Chain ID: 64165\n\
         Nonce: {nonce}\n\
         Issued At: {}\n\
         Expiration Time: {}",
        signer.address().to_checksum(None),
        now.to_rfc3339_opts(SecondsFormat::Secs, true),
        (now + Duration::hours(1)).to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

async fn sign_in(state: &Arc<ApiState>, signer: &PrivateKeySigner) -> (StatusCode, Value) {
    let (_, nonce) = read(api::auth_nonce(State(state.clone())).await.into_response()).await;
    let message = sign_in_message(signer, nonce["nonce"].as_str().unwrap());
    let signature = signer.sign_message_sync(message.as_bytes()).unwrap();
    let req = VerifyRequest {
        message,
        signature: format!("0x{}", hex::encode(signature.as_bytes())),
    };
    read(
        api::auth_verify(State(state.clone()), Json(req))
            .await
            .into_response(),
    )
    .await
}

async fn project_body(state: &Arc<ApiState>, address: Address) -> Value {
    let (_, body) = read(
        api::get_project(State(state.clone()), Path(address.to_string()))
            .await
            .into_response(),
    )
    .await;
    body
}

// ─────────────────────────────────────────────────────────
// Health & uploads
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let (status, body) = read(api::health().await.into_response()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_upload_without_credentials_is_unavailable() {
    let state = state(MockChain::new(), None, vec![]).await;
    let mp = multipart("file", "tower.png", "image/png", "PNG").await;

    let (status, body) = read(api::upload_image(State(state), mp).await.into_response()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "IPFS configuration unavailable");
}

#[tokio::test]
async fn test_upload_pins_and_records() {
    let pinning: Arc<dyn PinningService> = Arc::new(FakePinning { fail: false });
    let state = state(MockChain::new(), Some(pinning), vec![]).await;
    let mp = multipart("file", "tower.png", "image/png", "PNGDATA").await;

    let (status, body) =
        read(api::upload_image(State(state.clone()), mp).await.into_response()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cid"], "bafy7");
    assert_eq!(body["name"], "tower.png");
    assert_eq!(body["size"], 7);

    let stored = db::recent_uploads(&state.pool, 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].cid, "bafy7");
    assert_eq!(stored[0].content_type, "image/png");
}

#[tokio::test]
async fn test_upload_fails_when_the_record_cannot_be_stored() {
    let pinning: Arc<dyn PinningService> = Arc::new(FakePinning { fail: false });
    let state = state(MockChain::new(), Some(pinning), vec![]).await;
    state.pool.close().await;
    let mp = multipart("file", "tower.png", "image/png", "PNGDATA").await;

    let (status, body) = read(api::upload_image(State(state), mp).await.into_response()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.get("cid").is_none());
}

#[tokio::test]
async fn test_upload_rejects_non_image() {
    let pinning: Arc<dyn PinningService> = Arc::new(FakePinning { fail: false });
    let state = state(MockChain::new(), Some(pinning), vec![]).await;
    let mp = multipart("file", "deck.pdf", "application/pdf", "%PDF").await;

    let (status, body) = read(api::upload_image(State(state), mp).await.into_response()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "The file must be an image");
}

#[tokio::test]
async fn test_upload_failure_carries_details() {
    let pinning: Arc<dyn PinningService> = Arc::new(FakePinning { fail: true });
    let state = state(MockChain::new(), Some(pinning), vec![]).await;
    let mp = multipart("file", "tower.png", "image/png", "PNG").await;

    let (status, body) = read(api::upload_image(State(state), mp).await.into_response()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Error uploading file to IPFS");
    assert_eq!(body["details"], "pinata down");
}

// ─────────────────────────────────────────────────────────
// Sign-in
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_sign_in_opens_a_non_admin_session() {
    let state = state(MockChain::new(), None, vec![Address::repeat_byte(0x99)]).await;
    let signer = PrivateKeySigner::random();

    let (status, session) = sign_in(&state, &signer).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["is_admin"], false);
    let token = session["token"].as_str().unwrap().to_string();

    let (status, current) = read(
        api::auth_session(State(state.clone()), bearer(&token))
            .await
            .into_response(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        current["address"].as_str().unwrap().to_lowercase(),
        signer.address().to_string().to_lowercase()
    );

    let (status, _) = read(
        api::list_uploads(State(state.clone()), bearer(&token))
            .await
            .into_response(),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_session_lists_uploads() {
    let signer = PrivateKeySigner::random();
    let state = state(MockChain::new(), None, vec![signer.address()]).await;
    db::insert_upload(&state.pool, "bafyX", "x.png", 1, "image/png", 1)
        .await
        .unwrap();

    let (_, session) = sign_in(&state, &signer).await;
    assert_eq!(session["is_admin"], true);
    let token = session["token"].as_str().unwrap().to_string();

    let (status, body) = read(
        api::list_uploads(State(state.clone()), bearer(&token))
            .await
            .into_response(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn test_nonce_endpoint_sheds_load() {
    let state = Arc::new(ApiState {
        pool: db::connect("sqlite::memory:", 1).await.unwrap(),
        reader: Reader::new(MockChain::new(), ReadCache::new(), Deployment::default()),
        pinning: None,
        sessions: SessionStore::new(3600).with_nonce_limit(1),
        admins: Arc::new(AllowListPolicy::new(Vec::new())),
        siwe_domain: None,
        max_projects: 5,
    });

    let (status, _) = read(api::auth_nonce(State(state.clone())).await.into_response()).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = read(api::auth_nonce(State(state)).await.into_response()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_sign_in_nonce_is_single_use() {
    let state = state(MockChain::new(), None, vec![]).await;
    let signer = PrivateKeySigner::random();

    let (_, nonce) = read(api::auth_nonce(State(state.clone())).await.into_response()).await;
    let message = sign_in_message(&signer, nonce["nonce"].as_str().unwrap());
    let signature = format!(
        "0x{}",
        hex::encode(signer.sign_message_sync(message.as_bytes()).unwrap().as_bytes())
    );

    let mut statuses = Vec::new();
    for _ in 0..2 {
        let req = VerifyRequest {
            message: message.clone(),
            signature: signature.clone(),
        };
        let (status, _) = read(
            api::auth_verify(State(state.clone()), Json(req))
                .await
                .into_response(),
        )
        .await;
        statuses.push(status);
    }
    assert_eq!(statuses, [StatusCode::OK, StatusCode::UNAUTHORIZED]);
}

#[tokio::test]
async fn test_logout_ends_the_session() {
    let state = state(MockChain::new(), None, vec![]).await;
    let signer = PrivateKeySigner::random();
    let (_, session) = sign_in(&state, &signer).await;
    let token = session["token"].as_str().unwrap().to_string();

    let resp = api::auth_logout(State(state.clone()), bearer(&token))
        .await
        .into_response();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let (status, _) = read(
        api::auth_session(State(state.clone()), bearer(&token))
            .await
            .into_response(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let resp = api::auth_logout(State(state), bearer(&token))
        .await
        .into_response();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sign_in_rejects_unknown_nonce_and_bad_signature() {
    let state = state(MockChain::new(), None, vec![]).await;
    let signer = PrivateKeySigner::random();

    // Nonce never issued by this server.
    let message = sign_in_message(&signer, "notIssued123");
    let signature = signer.sign_message_sync(message.as_bytes()).unwrap();
    let req = VerifyRequest {
        message: message.clone(),
        signature: format!("0x{}", hex::encode(signature.as_bytes())),
    };
    let (status, _) = read(
        api::auth_verify(State(state.clone()), Json(req))
            .await
            .into_response(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = VerifyRequest {
        message,
        signature: "0xdeadbeef".to_string(),
    };
    let (status, _) = read(
        api::auth_verify(State(state.clone()), Json(req))
            .await
            .into_response(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = read(
        api::auth_session(State(state), HeaderMap::new())
            .await
            .into_response(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ─────────────────────────────────────────────────────────
// Projects
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_project() {
    let mock = MockChain::new();
    mock.set_project(&project(POOL_A, "torre", Phase::Buying));
    let state = state(mock, None, vec![]).await;

    let (status, body) = read(
        api::get_project(State(state.clone()), Path(POOL_A.to_string()))
            .await
            .into_response(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "torre");
    assert_eq!(body["phase_label"], "Active");
    assert_eq!(body["total_sold"], "250000");

    let (status, _) = read(
        api::get_project(State(state.clone()), Path(POOL_B.to_string()))
            .await
            .into_response(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = read(
        api::get_project(State(state), Path("0xnope".to_string()))
            .await
            .into_response(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_project_reads_follow_the_chain() {
    let mock = MockChain::new();
    mock.set_project(&project(POOL_A, "torre", Phase::Buying));
    let cache = ReadCache::with_limits(std::time::Duration::from_millis(50), 1_000);
    let state = state_with_cache(mock.clone(), None, vec![], cache).await;

    let first = project_body(&state, POOL_A).await;
    assert_eq!(first["phase_label"], "Active");
    assert_eq!(first["total_sold"], "250000");

    let mut funded = project(POOL_A, "torre", Phase::SoftcapReached);
    funded.total_sold = whole_tokens(900_000, 18);
    mock.set_project(&funded);

    // Within the max age the snapshot is served from cache.
    assert_eq!(project_body(&state, POOL_A).await["phase_label"], "Active");

    tokio::time::sleep(std::time::Duration::from_millis(80)).await;
    let after = project_body(&state, POOL_A).await;
    assert_eq!(after["phase_label"], "Funded");
    assert_eq!(after["total_sold"], "900000");
}

#[tokio::test]
async fn test_list_projects_filters() {
    let mock = MockChain::new();
    list_factory(&mock, &[POOL_A, POOL_B]);
    mock.set_project(&project(POOL_A, "torre", Phase::Buying));
    mock.set_project(&project(POOL_B, "casa", Phase::ClaimReady));
    let state = state(mock, None, vec![]).await;

    let (status, all) = read(
        api::list_projects(State(state.clone()), Query(ProjectQuery::default()))
            .await
            .into_response(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["count"], 2);

    let query = ProjectQuery {
        search: None,
        phase: Some("claim_ready".to_string()),
    };
    let (_, claimable) = read(
        api::list_projects(State(state.clone()), Query(query))
            .await
            .into_response(),
    )
    .await;
    assert_eq!(claimable["count"], 1);
    assert_eq!(claimable["projects"][0]["name"], "casa");

    let query = ProjectQuery {
        search: Some("TORRE".to_string()),
        phase: Some("0".to_string()),
    };
    let (_, found) = read(
        api::list_projects(State(state.clone()), Query(query))
            .await
            .into_response(),
    )
    .await;
    assert_eq!(found["count"], 1);

    let query = ProjectQuery {
        search: None,
        phase: Some("launching".to_string()),
    };
    let (status, _) = read(
        api::list_projects(State(state), Query(query))
            .await
            .into_response(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invest_plan_validates_before_reading() {
    let mock = MockChain::new();
    let state = state(mock.clone(), None, vec![]).await;

    for amount in ["abc", "0", "99"] {
        let query = InvestPlanQuery {
            investor: Some(INVESTOR.to_string()),
            amount: amount.to_string(),
        };
        let (status, _) = read(
            api::invest_plan(State(state.clone()), Path(POOL_A.to_string()), Query(query))
                .await
                .into_response(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
    assert_eq!(mock.network_calls(), 0);
}

#[tokio::test]
async fn test_invest_plan_steps() {
    let mock = MockChain::new();
    mock.respond(
        Deployment::default().stablecoin.address,
        IStablecoin::allowanceCall {
            owner: INVESTOR,
            spender: POOL_A,
        },
        word(whole_tokens(100, 18)),
    );
    let state = state(mock, None, vec![]).await;

    let plan = |investor: Option<Address>, amount: &str| InvestPlanQuery {
        investor: investor.map(|a| a.to_string()),
        amount: amount.to_string(),
    };

    let (_, body) = read(
        api::invest_plan(
            State(state.clone()),
            Path(POOL_A.to_string()),
            Query(plan(None, "150")),
        )
        .await
        .into_response(),
    )
    .await;
    assert_eq!(body["step"], "connect_wallet");

    let (_, body) = read(
        api::invest_plan(
            State(state.clone()),
            Path(POOL_A.to_string()),
            Query(plan(Some(INVESTOR), "150")),
        )
        .await
        .into_response(),
    )
    .await;
    assert_eq!(body["step"], "approve");

    let (_, body) = read(
        api::invest_plan(
            State(state),
            Path(POOL_A.to_string()),
            Query(plan(Some(INVESTOR), "100")),
        )
        .await
        .into_response(),
    )
    .await;
    assert_eq!(body["step"], "invest");
}

#[tokio::test]
async fn test_position() {
    let mock = MockChain::new();
    mock.set_project(&project(POOL_A, "torre", Phase::RefundAvailable));
    mock.respond(
        POOL_A,
        brickfi_client::contracts::IPool::balanceOfCall { account: INVESTOR },
        word(whole_tokens(500, 18)),
    );
    let state = state(mock, None, vec![]).await;

    let (status, body) = read(
        api::get_position(
            State(state),
            Path((POOL_A.to_string(), INVESTOR.to_string())),
        )
        .await
        .into_response(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["can_refund"], true);
    assert_eq!(body["can_claim"], false);
}
