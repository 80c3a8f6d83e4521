//! Production authority over `instant-acme`
//!
//! Account credentials are persisted through the [`RecordStore`] so the
//! account is created once and reused on every later run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use instant_acme::{
    Account, AccountCredentials, ChallengeType, Identifier, NewAccount, NewOrder, Order,
    RevocationRequest,
};
use rustls::pki_types::CertificateDer;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, trace};

use super::authority::{
    AuthorizationInfo, AuthorizationStatus, CertificateAuthority, DnsChallenge, OrderHandle,
    OrderState, OrderStatus,
};
use super::error::{classify_acme_error, AcmeError, AcmeResult};
use crate::record::RevocationReason;
use crate::storage::RecordStore;

/// ACME authority reached over HTTPS
pub struct AcmeAuthority {
    directory_url: String,
    contact: Vec<String>,
    store: Arc<dyn RecordStore>,
    account: RwLock<Option<Account>>,
    orders: DashMap<String, Arc<Mutex<Order>>>,
    next_order: AtomicU64,
}

impl std::fmt::Debug for AcmeAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeAuthority")
            .field("directory_url", &self.directory_url)
            .field("contact", &self.contact)
            .field("open_orders", &self.orders.len())
            .finish_non_exhaustive()
    }
}

impl AcmeAuthority {
    pub fn new(directory_url: &str, email: Option<&str>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            directory_url: directory_url.to_string(),
            contact: email.map(|e| format!("mailto:{}", e)).into_iter().collect(),
            store,
            account: RwLock::new(None),
            orders: DashMap::new(),
            next_order: AtomicU64::new(0),
        }
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    async fn account(&self) -> AcmeResult<Account> {
        self.ensure_account().await?;
        self.account
            .read()
            .await
            .clone()
            .ok_or_else(|| AcmeError::AccountStorage("account not initialized".to_string()))
    }

    fn order(&self, handle: &OrderHandle) -> AcmeResult<Arc<Mutex<Order>>> {
        self.orders
            .get(&handle.id)
            .map(|o| Arc::clone(o.value()))
            .ok_or_else(|| AcmeError::UnknownOrder(handle.id.clone()))
    }
}

/// Label authorizations with order identifiers
///
/// A wildcard authorization reports its base name, so `example.com` appears
/// twice for an order of `example.com` and `*.example.com`. The second
/// occurrence is attributed to the wildcard.
pub(crate) fn attribute_identifiers(order_identifiers: &[String], reported: &[String]) -> Vec<String> {
    let mut used = vec![false; order_identifiers.len()];
    reported
        .iter()
        .map(|name| {
            let wildcard = format!("*.{}", name);
            let slot = order_identifiers
                .iter()
                .enumerate()
                .find(|(i, id)| !used[*i] && id.eq_ignore_ascii_case(name))
                .or_else(|| {
                    order_identifiers
                        .iter()
                        .enumerate()
                        .find(|(i, id)| !used[*i] && id.eq_ignore_ascii_case(&wildcard))
                })
                .map(|(i, id)| (i, id.clone()));
            match slot {
                Some((i, id)) => {
                    used[i] = true;
                    id
                }
                None => name.clone(),
            }
        })
        .collect()
}

fn map_authorization_status(status: instant_acme::AuthorizationStatus) -> AuthorizationStatus {
    use instant_acme::AuthorizationStatus as S;
    match status {
        S::Pending => AuthorizationStatus::Pending,
        S::Valid => AuthorizationStatus::Valid,
        S::Invalid => AuthorizationStatus::Invalid,
        S::Revoked => AuthorizationStatus::Revoked,
        S::Expired => AuthorizationStatus::Expired,
    }
}

fn map_order_status(status: instant_acme::OrderStatus) -> OrderStatus {
    use instant_acme::OrderStatus as S;
    match status {
        S::Pending => OrderStatus::Pending,
        S::Ready => OrderStatus::Ready,
        S::Processing => OrderStatus::Processing,
        S::Valid => OrderStatus::Valid,
        S::Invalid => OrderStatus::Invalid,
    }
}

fn map_revocation_reason(reason: RevocationReason) -> instant_acme::RevocationReason {
    use instant_acme::RevocationReason as R;
    match reason {
        RevocationReason::Unspecified => R::Unspecified,
        RevocationReason::KeyCompromise => R::KeyCompromise,
        RevocationReason::CaCompromise => R::CaCompromise,
        RevocationReason::AffiliationChanged => R::AffiliationChanged,
        RevocationReason::Superseded => R::Superseded,
        RevocationReason::CessationOfOperation => R::CessationOfOperation,
        RevocationReason::CertificateHold => R::CertificateHold,
        RevocationReason::RemoveFromCrl => R::RemoveFromCrl,
        RevocationReason::PrivilegeWithdrawn => R::PrivilegeWithdrawn,
        RevocationReason::AaCompromise => R::AaCompromise,
    }
}

fn problem_detail(problem: &instant_acme::Problem) -> String {
    problem
        .detail
        .clone()
        .or_else(|| problem.r#type.clone())
        .unwrap_or_else(|| "unspecified problem".to_string())
}

#[async_trait]
impl CertificateAuthority for AcmeAuthority {
    fn name(&self) -> &'static str {
        "acme"
    }

    async fn ensure_account(&self) -> AcmeResult<()> {
        if self.account.read().await.is_some() {
            return Ok(());
        }

        let mut slot = self.account.write().await;
        if slot.is_some() {
            return Ok(());
        }

        let stored = self
            .store
            .load_account_credentials()
            .map_err(|e| AcmeError::AccountStorage(e.to_string()))?;

        if let Some(json) = stored {
            let credentials: AccountCredentials = serde_json::from_str(&json).map_err(|e| {
                AcmeError::AccountStorage(format!("failed to deserialize credentials: {}", e))
            })?;
            let account = Account::from_credentials(credentials)
                .await
                .map_err(|e| classify_acme_error("load_account", e))?;
            info!(directory = %self.directory_url, "Loaded existing ACME account");
            *slot = Some(account);
            return Ok(());
        }

        info!(directory = %self.directory_url, contact = ?self.contact, "Creating new ACME account");
        let contact: Vec<&str> = self.contact.iter().map(String::as_str).collect();
        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &contact,
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            &self.directory_url,
            None,
        )
        .await
        .map_err(|e| classify_acme_error("create_account", e))?;

        let json = serde_json::to_string_pretty(&credentials).map_err(|e| {
            AcmeError::AccountStorage(format!("failed to serialize credentials: {}", e))
        })?;
        self.store
            .save_account_credentials(&json)
            .map_err(|e| AcmeError::AccountStorage(e.to_string()))?;

        info!("ACME account created");
        *slot = Some(account);
        Ok(())
    }

    async fn new_order(&self, identifiers: &[String]) -> AcmeResult<OrderHandle> {
        let account = self.account().await?;
        let ids: Vec<Identifier> = identifiers.iter().map(|d| Identifier::Dns(d.clone())).collect();

        let order = account
            .new_order(&NewOrder { identifiers: &ids })
            .await
            .map_err(|e| classify_acme_error("new_order", e))?;

        let id = format!("order-{}", self.next_order.fetch_add(1, Ordering::SeqCst) + 1);
        self.orders.insert(id.clone(), Arc::new(Mutex::new(order)));
        debug!(order = %id, identifiers = ?identifiers, "Created ACME order");

        Ok(OrderHandle {
            id,
            identifiers: identifiers.to_vec(),
        })
    }

    async fn authorizations(&self, handle: &OrderHandle) -> AcmeResult<Vec<AuthorizationInfo>> {
        let order = self.order(handle)?;
        let mut order = order.lock().await;

        let authorizations = order
            .authorizations()
            .await
            .map_err(|e| classify_acme_error("authorizations", e))?;

        let reported: Vec<String> = authorizations
            .iter()
            .map(|authz| {
                let Identifier::Dns(name) = &authz.identifier;
                name.clone()
            })
            .collect();
        let labels = attribute_identifiers(&handle.identifiers, &reported);

        let infos = authorizations
            .iter()
            .zip(labels)
            .map(|(authz, identifier)| {
                let challenge = authz
                    .challenges
                    .iter()
                    .find(|c| c.r#type == ChallengeType::Dns01);

                let dns_challenge = challenge.map(|c| DnsChallenge {
                    url: c.url.clone(),
                    token: c.token.clone(),
                    key_authorization: order.key_authorization(c).as_str().to_string(),
                });
                let error = challenge.and_then(|c| c.error.as_ref()).map(problem_detail);

                trace!(identifier = %identifier, status = ?authz.status, "Authorization");
                AuthorizationInfo {
                    identifier,
                    status: map_authorization_status(authz.status),
                    dns_challenge,
                    error,
                }
            })
            .collect();

        Ok(infos)
    }

    async fn challenge_ready(&self, handle: &OrderHandle, challenge_url: &str) -> AcmeResult<()> {
        let order = self.order(handle)?;
        let mut order = order.lock().await;
        order
            .set_challenge_ready(challenge_url)
            .await
            .map_err(|e| classify_acme_error("challenge_ready", e))
    }

    async fn order_state(&self, handle: &OrderHandle) -> AcmeResult<OrderState> {
        let order = self.order(handle)?;
        let mut order = order.lock().await;
        order
            .refresh()
            .await
            .map_err(|e| classify_acme_error("refresh_order", e))?;

        let state = order.state();
        Ok(OrderState {
            status: map_order_status(state.status),
            error: state.error.as_ref().map(problem_detail),
        })
    }

    async fn finalize(&self, handle: &OrderHandle, csr_der: &[u8]) -> AcmeResult<()> {
        let order = self.order(handle)?;
        let mut order = order.lock().await;
        order
            .finalize(csr_der)
            .await
            .map_err(|e| classify_acme_error("finalize", e))
    }

    async fn certificate(&self, handle: &OrderHandle) -> AcmeResult<Option<String>> {
        let order = self.order(handle)?;
        let mut order = order.lock().await;
        order
            .certificate()
            .await
            .map_err(|e| classify_acme_error("download_certificate", e))
    }

    async fn revoke(&self, certificate_der: &[u8], reason: RevocationReason) -> AcmeResult<()> {
        let account = self.account().await?;
        let certificate = CertificateDer::from(certificate_der.to_vec());
        account
            .revoke(&RevocationRequest {
                certificate: &certificate,
                reason: Some(map_revocation_reason(reason)),
            })
            .await
            .map_err(|e| classify_acme_error("revoke", e))?;
        info!(reason = %reason, "Certificate revoked with ACME authority");
        Ok(())
    }

    async fn release(&self, handle: &OrderHandle) {
        self.orders.remove(&handle.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_attribute_wildcard_second_occurrence() {
        let order = strings(&["example.com", "*.example.com"]);
        let labels = attribute_identifiers(&order, &strings(&["example.com", "example.com"]));
        assert_eq!(labels, order);
    }

    #[test]
    fn test_attribute_wildcard_only() {
        let order = strings(&["*.example.com"]);
        let labels = attribute_identifiers(&order, &strings(&["example.com"]));
        assert_eq!(labels, order);
    }

    #[test]
    fn test_attribute_plain_names() {
        let order = strings(&["a.example.com", "b.example.com"]);
        let labels = attribute_identifiers(&order, &strings(&["b.example.com", "a.example.com"]));
        assert_eq!(labels, strings(&["b.example.com", "a.example.com"]));
    }

    #[test]
    fn test_unknown_order_rejected() {
        let authority = AcmeAuthority::new(
            "https://acme.invalid/directory",
            Some("ops@example.com"),
            Arc::new(crate::storage::MemoryRecordStore::new()),
        );
        let handle = OrderHandle {
            id: "order-404".to_string(),
            identifiers: vec![],
        };
        assert!(matches!(authority.order(&handle), Err(AcmeError::UnknownOrder(_))));
        assert_eq!(authority.contact, vec!["mailto:ops@example.com".to_string()]);
    }
}
