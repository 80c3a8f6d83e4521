//! Development authority
//!
//! Implements the ACME order flow in process and signs certificates with a
//! root generated at startup. It stands in for a real authority in local
//! runs and tests, and exposes knobs to reject identifiers, delay
//! validation, inject transient failures and shorten certificate lifetime.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, DistinguishedName,
    DnType, IsCa, Issuer, KeyPair, KeyUsagePurpose, SerialNumber,
};
use rustls::pki_types::CertificateSigningRequestDer;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::authority::{
    AuthorizationInfo, AuthorizationStatus, CertificateAuthority, DnsChallenge, OrderHandle,
    OrderState, OrderStatus,
};
use super::error::{AcmeError, AcmeResult};
use crate::crypto::{self, CryptoError, KeySpec};
use crate::record::RevocationReason;

/// Default lifetime of issued certificates
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(90 * 24 * 60 * 60);

#[derive(Debug)]
struct DevAuthorization {
    identifier: String,
    token: String,
    challenge_url: String,
    status: AuthorizationStatus,
    ready: bool,
    polls_remaining: u32,
    error: Option<String>,
}

#[derive(Debug)]
struct DevOrder {
    authorizations: Vec<DevAuthorization>,
    status: OrderStatus,
    certificate: Option<String>,
}

impl DevOrder {
    fn refresh_status(&mut self) {
        if matches!(self.status, OrderStatus::Valid | OrderStatus::Processing) {
            return;
        }
        if self.authorizations.iter().any(|a| a.status.is_failed()) {
            self.status = OrderStatus::Invalid;
        } else if self
            .authorizations
            .iter()
            .all(|a| a.status == AuthorizationStatus::Valid)
        {
            self.status = OrderStatus::Ready;
        }
    }
}

#[derive(Debug)]
struct Knobs {
    rejected: HashSet<String>,
    validation_polls: u32,
    transient_failures: usize,
    lifetime: Duration,
    offer_dns01: bool,
}

/// In-process authority for development and tests
pub struct DevelopmentAuthority {
    issuer: Issuer<'static, KeyPair>,
    root_pem: String,
    thumbprint: String,
    account_registered: AtomicBool,
    orders: Mutex<HashMap<String, DevOrder>>,
    knobs: Mutex<Knobs>,
    revoked_serials: Mutex<Vec<String>>,
    next_id: AtomicU64,
    account_calls: AtomicUsize,
    finalize_calls: AtomicUsize,
    ready_calls: AtomicUsize,
}

impl std::fmt::Debug for DevelopmentAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevelopmentAuthority")
            .field("open_orders", &self.orders.lock().len())
            .field("knobs", &*self.knobs.lock())
            .finish_non_exhaustive()
    }
}

impl DevelopmentAuthority {
    /// Create an authority with a fresh ECDSA P-256 root
    pub fn new() -> Result<Self, CryptoError> {
        let key = crypto::generate_key_pair(KeySpec::EcdsaP256)?;

        let mut params = CertificateParams::new(Vec::<String>::new())
            .map_err(|e| CryptoError::Certificate(e.to_string()))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "certkeeper development root");
        dn.push(DnType::OrganizationName, "certkeeper");
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let now = SystemTime::now();
        params.not_before = (now - Duration::from_secs(60)).into();
        params.not_after = (now + Duration::from_secs(10 * 365 * 24 * 60 * 60)).into();

        let root_pem = params
            .self_signed(&key)
            .map_err(|e| CryptoError::Certificate(e.to_string()))?
            .pem();
        let issuer = Issuer::new(params, key);

        let thumbprint = URL_SAFE_NO_PAD.encode(Sha256::digest(root_pem.as_bytes()));

        Ok(Self {
            issuer,
            root_pem,
            thumbprint,
            account_registered: AtomicBool::new(false),
            orders: Mutex::new(HashMap::new()),
            knobs: Mutex::new(Knobs {
                rejected: HashSet::new(),
                validation_polls: 0,
                transient_failures: 0,
                lifetime: DEFAULT_LIFETIME,
                offer_dns01: true,
            }),
            revoked_serials: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            account_calls: AtomicUsize::new(0),
            finalize_calls: AtomicUsize::new(0),
            ready_calls: AtomicUsize::new(0),
        })
    }

    /// PEM of the signing root
    pub fn root_pem(&self) -> &str {
        &self.root_pem
    }

    /// Authorizations for `identifier` become invalid once validated
    pub fn reject_identifier(&self, identifier: &str) {
        self.knobs
            .lock()
            .rejected
            .insert(identifier.to_ascii_lowercase());
    }

    /// Number of status polls before a ready challenge settles
    pub fn set_validation_polls(&self, polls: u32) {
        self.knobs.lock().validation_polls = polls;
    }

    /// Fail the next `count` authority calls with a transient error
    pub fn fail_next_calls(&self, count: usize) {
        self.knobs.lock().transient_failures = count;
    }

    /// Lifetime of certificates issued from now on
    pub fn set_lifetime(&self, lifetime: Duration) {
        self.knobs.lock().lifetime = lifetime;
    }

    /// Stop offering DNS-01 challenges
    pub fn set_offer_dns01(&self, offer: bool) {
        self.knobs.lock().offer_dns01 = offer;
    }

    pub fn finalize_calls(&self) -> usize {
        self.finalize_calls.load(Ordering::SeqCst)
    }

    pub fn ready_calls(&self) -> usize {
        self.ready_calls.load(Ordering::SeqCst)
    }

    pub fn account_calls(&self) -> usize {
        self.account_calls.load(Ordering::SeqCst)
    }

    pub fn open_orders(&self) -> usize {
        self.orders.lock().len()
    }

    /// Hex serials revoked so far
    pub fn revoked_serials(&self) -> Vec<String> {
        self.revoked_serials.lock().clone()
    }

    fn key_authorization(&self, token: &str) -> String {
        format!("{}.{}", token, self.thumbprint)
    }

    fn injected_failure(&self, operation: &str) -> AcmeResult<()> {
        let mut knobs = self.knobs.lock();
        if knobs.transient_failures > 0 {
            knobs.transient_failures -= 1;
            return Err(AcmeError::transient(operation, "injected service unavailable"));
        }
        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn sign(&self, csr_der: &[u8], lifetime: Duration) -> AcmeResult<String> {
        let der = CertificateSigningRequestDer::from(csr_der.to_vec());
        let mut csr = CertificateSigningRequestParams::from_der(&der)
            .map_err(|e| AcmeError::rejected("finalize", format!("badCSR: {}", e)))?;

        let now = SystemTime::now();
        csr.params.not_before = (now - Duration::from_secs(60)).into();
        csr.params.not_after = (now + lifetime).into();
        csr.params.serial_number = Some(SerialNumber::from_slice(
            &Sha256::digest(self.next_id("serial").as_bytes())[..16],
        ));

        let leaf = csr
            .signed_by(&self.issuer)
            .map_err(|e| AcmeError::rejected("finalize", e))?;

        Ok(format!("{}{}", leaf.pem(), self.root_pem))
    }
}

#[async_trait]
impl CertificateAuthority for DevelopmentAuthority {
    fn name(&self) -> &'static str {
        "development"
    }

    async fn ensure_account(&self) -> AcmeResult<()> {
        self.account_calls.fetch_add(1, Ordering::SeqCst);
        self.injected_failure("ensure_account")?;

        if self.account_registered.swap(true, Ordering::SeqCst) {
            debug!("Development account already exists");
        } else {
            info!("Registered development account");
        }
        Ok(())
    }

    async fn new_order(&self, identifiers: &[String]) -> AcmeResult<OrderHandle> {
        self.injected_failure("new_order")?;
        if identifiers.is_empty() {
            return Err(AcmeError::rejected("new_order", "malformed: no identifiers"));
        }

        let polls = self.knobs.lock().validation_polls;
        let authorizations = identifiers
            .iter()
            .map(|identifier| {
                let token = URL_SAFE_NO_PAD.encode(Sha256::digest(self.next_id("token").as_bytes()));
                DevAuthorization {
                    identifier: identifier.to_ascii_lowercase(),
                    challenge_url: format!("dev://challenge/{}", self.next_id("chall")),
                    token,
                    status: AuthorizationStatus::Pending,
                    ready: false,
                    polls_remaining: polls,
                    error: None,
                }
            })
            .collect();

        let id = self.next_id("order");
        self.orders.lock().insert(
            id.clone(),
            DevOrder {
                authorizations,
                status: OrderStatus::Pending,
                certificate: None,
            },
        );

        debug!(order = %id, identifiers = ?identifiers, "Created development order");
        Ok(OrderHandle {
            id,
            identifiers: identifiers.to_vec(),
        })
    }

    async fn authorizations(&self, handle: &OrderHandle) -> AcmeResult<Vec<AuthorizationInfo>> {
        self.injected_failure("authorizations")?;

        let (rejected, offer_dns01) = {
            let knobs = self.knobs.lock();
            (knobs.rejected.clone(), knobs.offer_dns01)
        };

        let mut orders = self.orders.lock();
        let order = orders
            .get_mut(&handle.id)
            .ok_or_else(|| AcmeError::UnknownOrder(handle.id.clone()))?;

        for authz in order
            .authorizations
            .iter_mut()
            .filter(|a| a.ready && a.status == AuthorizationStatus::Pending)
        {
            if authz.polls_remaining > 0 {
                authz.polls_remaining -= 1;
                continue;
            }
            if rejected.contains(&authz.identifier) {
                authz.status = AuthorizationStatus::Invalid;
                authz.error = Some(format!(
                    "incorrect TXT record found at _acme-challenge.{}",
                    crate::dns::base_domain(&authz.identifier)
                ));
            } else {
                authz.status = AuthorizationStatus::Valid;
            }
        }
        order.refresh_status();

        Ok(order
            .authorizations
            .iter()
            .map(|a| AuthorizationInfo {
                identifier: a.identifier.clone(),
                status: a.status,
                dns_challenge: offer_dns01.then(|| DnsChallenge {
                    url: a.challenge_url.clone(),
                    token: a.token.clone(),
                    key_authorization: self.key_authorization(&a.token),
                }),
                error: a.error.clone(),
            })
            .collect())
    }

    async fn challenge_ready(&self, handle: &OrderHandle, challenge_url: &str) -> AcmeResult<()> {
        self.injected_failure("challenge_ready")?;
        self.ready_calls.fetch_add(1, Ordering::SeqCst);

        let mut orders = self.orders.lock();
        let order = orders
            .get_mut(&handle.id)
            .ok_or_else(|| AcmeError::UnknownOrder(handle.id.clone()))?;
        let authz = order
            .authorizations
            .iter_mut()
            .find(|a| a.challenge_url == challenge_url)
            .ok_or_else(|| AcmeError::rejected("challenge_ready", "unknown challenge"))?;
        authz.ready = true;
        Ok(())
    }

    async fn order_state(&self, handle: &OrderHandle) -> AcmeResult<OrderState> {
        self.injected_failure("order_state")?;

        let mut orders = self.orders.lock();
        let order = orders
            .get_mut(&handle.id)
            .ok_or_else(|| AcmeError::UnknownOrder(handle.id.clone()))?;
        order.refresh_status();

        let error = order
            .authorizations
            .iter()
            .find_map(|a| a.error.clone());
        Ok(OrderState {
            status: order.status,
            error: (order.status == OrderStatus::Invalid).then_some(error).flatten(),
        })
    }

    async fn finalize(&self, handle: &OrderHandle, csr_der: &[u8]) -> AcmeResult<()> {
        self.injected_failure("finalize")?;
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);

        let lifetime = self.knobs.lock().lifetime;
        {
            let mut orders = self.orders.lock();
            let order = orders
                .get_mut(&handle.id)
                .ok_or_else(|| AcmeError::UnknownOrder(handle.id.clone()))?;
            order.refresh_status();
            if order.status != OrderStatus::Ready {
                return Err(AcmeError::rejected("finalize", "orderNotReady"));
            }
            order.status = OrderStatus::Processing;
        }

        let signed = self.sign(csr_der, lifetime);

        let mut orders = self.orders.lock();
        let order = orders
            .get_mut(&handle.id)
            .ok_or_else(|| AcmeError::UnknownOrder(handle.id.clone()))?;
        match signed {
            Ok(pem) => {
                order.certificate = Some(pem);
                order.status = OrderStatus::Valid;
                Ok(())
            }
            Err(e) => {
                order.status = OrderStatus::Invalid;
                Err(e)
            }
        }
    }

    async fn certificate(&self, handle: &OrderHandle) -> AcmeResult<Option<String>> {
        self.injected_failure("certificate")?;
        let orders = self.orders.lock();
        let order = orders
            .get(&handle.id)
            .ok_or_else(|| AcmeError::UnknownOrder(handle.id.clone()))?;
        Ok(order.certificate.clone())
    }

    async fn revoke(&self, certificate_der: &[u8], reason: RevocationReason) -> AcmeResult<()> {
        self.injected_failure("revoke")?;

        let (_, cert) = x509_parser::parse_x509_certificate(certificate_der)
            .map_err(|e| AcmeError::rejected("revoke", format!("malformed certificate: {}", e)))?;
        let serial = cert.raw_serial_as_string();

        let mut revoked = self.revoked_serials.lock();
        if revoked.contains(&serial) {
            return Err(AcmeError::rejected("revoke", "alreadyRevoked"));
        }
        revoked.push(serial.clone());
        info!(serial = %serial, reason = %reason, "Revoked development certificate");
        Ok(())
    }

    async fn release(&self, handle: &OrderHandle) {
        self.orders.lock().remove(&handle.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{build_csr, certificate_validity, split_chain};

    async fn ready_order(ca: &DevelopmentAuthority, identifiers: &[&str]) -> OrderHandle {
        let ids: Vec<String> = identifiers.iter().map(|s| s.to_string()).collect();
        ca.ensure_account().await.unwrap();
        let order = ca.new_order(&ids).await.unwrap();
        for authz in ca.authorizations(&order).await.unwrap() {
            let challenge = authz.dns_challenge.unwrap();
            assert!(challenge.key_authorization.starts_with(&challenge.token));
            ca.challenge_ready(&order, &challenge.url).await.unwrap();
        }
        order
    }

    #[tokio::test]
    async fn test_issues_certificate_from_csr() {
        let ca = DevelopmentAuthority::new().unwrap();
        let order = ready_order(&ca, &["example.com", "*.example.com"]).await;

        let authz = ca.authorizations(&order).await.unwrap();
        assert!(authz.iter().all(|a| a.status == AuthorizationStatus::Valid));
        assert_eq!(ca.order_state(&order).await.unwrap().status, OrderStatus::Ready);

        let key = crypto::generate_key_pair(KeySpec::EcdsaP256).unwrap();
        let csr = build_csr("example.com", &[], true, &key).unwrap();
        ca.finalize(&order, &csr.der).await.unwrap();

        let pem = ca.certificate(&order).await.unwrap().unwrap();
        let (leaf, chain) = split_chain(&pem).unwrap();
        assert_eq!(
            crypto::certificate_ders(&chain).unwrap(),
            crypto::certificate_ders(ca.root_pem()).unwrap()
        );

        let (not_before, not_after) = certificate_validity(&leaf).unwrap();
        assert!(not_after > not_before);
        assert!(not_after > chrono::Utc::now() + chrono::Duration::days(89));
    }

    #[tokio::test]
    async fn test_rejected_identifier_invalidates_order() {
        let ca = DevelopmentAuthority::new().unwrap();
        ca.reject_identifier("www.example.com");
        let order = ready_order(&ca, &["example.com", "www.example.com"]).await;

        let authz = ca.authorizations(&order).await.unwrap();
        let invalid: Vec<_> = authz
            .iter()
            .filter(|a| a.status == AuthorizationStatus::Invalid)
            .collect();
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].identifier, "www.example.com");
        assert!(invalid[0].error.is_some());

        let state = ca.order_state(&order).await.unwrap();
        assert_eq!(state.status, OrderStatus::Invalid);
    }

    #[tokio::test]
    async fn test_validation_polls_delay_settlement() {
        let ca = DevelopmentAuthority::new().unwrap();
        ca.set_validation_polls(2);
        let order = ready_order(&ca, &["example.com"]).await;

        assert_eq!(
            ca.authorizations(&order).await.unwrap()[0].status,
            AuthorizationStatus::Pending
        );
        ca.authorizations(&order).await.unwrap();
        assert_eq!(
            ca.authorizations(&order).await.unwrap()[0].status,
            AuthorizationStatus::Valid
        );
    }

    #[tokio::test]
    async fn test_finalize_before_ready_rejected() {
        let ca = DevelopmentAuthority::new().unwrap();
        let order = ca.new_order(&["example.com".to_string()]).await.unwrap();
        let key = crypto::generate_key_pair(KeySpec::EcdsaP256).unwrap();
        let csr = build_csr("example.com", &[], false, &key).unwrap();

        let err = ca.finalize(&order, &csr.der).await.unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient() {
        let ca = DevelopmentAuthority::new().unwrap();
        ca.fail_next_calls(1);
        assert!(ca.ensure_account().await.unwrap_err().is_transient());
        ca.ensure_account().await.unwrap();
        // Second registration is "already exists", still success
        ca.ensure_account().await.unwrap();
        assert_eq!(ca.account_calls(), 3);
    }

    #[tokio::test]
    async fn test_revoke_once() {
        let ca = DevelopmentAuthority::new().unwrap();
        let order = ready_order(&ca, &["example.com"]).await;
        ca.authorizations(&order).await.unwrap();
        let key = crypto::generate_key_pair(KeySpec::EcdsaP256).unwrap();
        let csr = build_csr("example.com", &[], false, &key).unwrap();
        ca.finalize(&order, &csr.der).await.unwrap();
        let pem = ca.certificate(&order).await.unwrap().unwrap();
        let der = crypto::certificate_ders(&pem).unwrap().remove(0);

        ca.revoke(&der, RevocationReason::Superseded).await.unwrap();
        assert_eq!(ca.revoked_serials().len(), 1);
        assert!(ca.revoke(&der, RevocationReason::Superseded).await.is_err());
    }
}
