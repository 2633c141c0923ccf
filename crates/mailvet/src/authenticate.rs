//! The per-message entry point: verify every signature, apply the sign
//! policy, fold in trusted Authentication-Results, and produce the final
//! ordered result.

use crate::arh::collect_arh;
use crate::keystore::KeyStore;
use crate::prefs::Prefs;
use crate::rules::{
    apply_required_sdids, apply_rule, default_rules, maybe_auto_add_rule, select_rule, RuleStore,
};
use crate::storage::Storage;
use crate::wire::AuthResult;
use dkim::{sort_results, verify_message, SignatureResult};
use dns_resolver::Resolver;
use mailparsing::{MailParsingError, Message};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("message cannot be authenticated: {0}")]
    Message(#[from] MailParsingError),
}

pub struct Authenticator {
    prefs: Prefs,
    storage: Arc<dyn Storage>,
}

impl Authenticator {
    pub fn new(prefs: Prefs, storage: Arc<dyn Storage>) -> Self {
        Self { prefs, storage }
    }

    pub fn prefs(&self) -> &Prefs {
        &self.prefs
    }

    /// Authenticate one parsed message. DNS queries go through
    /// `resolver`; everything else is deterministic. Cancellation is
    /// dropping the returned future.
    pub async fn authenticate(
        &self,
        message: &Message<'_>,
        resolver: &dyn Resolver,
    ) -> Result<AuthResult, AuthError> {
        // a message without a single extractable From address cannot be
        // evaluated against any policy
        let from = message.from_address()?;
        let from_domain = from.domain.to_ascii_lowercase();

        if !self.prefs.dkim.enable {
            return Ok(AuthResult {
                dkim: vec![SignatureResult::none()],
                spf: vec![],
                dmarc: vec![],
                bimi_indicator: None,
            });
        }

        let key_store = KeyStore::new(
            self.prefs.key.storing,
            Arc::clone(&self.storage),
            resolver,
        );
        let mut results = verify_message(
            message,
            &from_domain,
            &key_store,
            &self.prefs.verify_options(),
        )
        .await;

        self.apply_policy(&mut results, message, &from, resolver)
            .await;

        let arh = if self.prefs.arh.read {
            Some(collect_arh(message, &from_domain, &self.prefs))
        } else {
            None
        };

        let (mut dkim_results, spf, dmarc, bimi_indicator) = match arh {
            Some(arh) => {
                let mut dkim_results = results;
                if self.prefs.arh.replace_addon_result && !arh.dkim.is_empty() {
                    dkim_results = arh.dkim;
                } else {
                    dkim_results.extend(arh.dkim);
                }
                (dkim_results, arh.spf, arh.dmarc, arh.bimi_indicator)
            }
            None => (results, vec![], vec![], None),
        };

        if dkim_results.is_empty() {
            dkim_results.push(SignatureResult::none());
        }
        sort_results(&mut dkim_results, &from_domain);

        Ok(AuthResult {
            dkim: dkim_results,
            spf,
            dmarc,
            bimi_indicator,
        })
    }

    async fn apply_policy(
        &self,
        results: &mut Vec<SignatureResult>,
        message: &Message<'_>,
        from: &mailparsing::AddrSpec,
        resolver: &dyn Resolver,
    ) {
        let rule_store = RuleStore::new(Arc::clone(&self.storage));

        if self.prefs.policy.sign_rules.enable {
            let mut rules = rule_store.user_rules();
            if self.prefs.policy.sign_rules.check_default_rules {
                rules.extend(default_rules());
            }
            let list_id = message.list_id();
            if let Some(rule) = select_rule(&rules, from, list_id.as_deref()) {
                tracing::debug!("sign rule selected for {from}: {rule:?}");
                apply_rule(results, rule, &self.prefs);
                return;
            }
            // no rule matched: remember provably signing senders
            maybe_auto_add_rule(&rule_store, from, results, &self.prefs);
        }

        if self.prefs.policy.dmarc.should_be_signed {
            let outcome = dmarc::should_be_signed(
                resolver,
                &from.domain,
                self.prefs.policy.dmarc.needed_policy,
            )
            .await;
            if outcome.should_be_signed {
                tracing::debug!(
                    "DMARC policy at {:?} requires a signature from {:?}",
                    outcome.source_domain,
                    outcome.sdids
                );
                apply_required_sdids(results, &outcome.sdids, &self.prefs);
            }
        }
    }
}
