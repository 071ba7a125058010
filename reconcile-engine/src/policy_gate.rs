//! C8: network/battery/background/concurrency/subscription checks that gate
//! operation admission (spec §4.8). Concurrency and duplicate-fingerprint
//! checks live in the operation registry (C9); this gate covers everything
//! checked before registration.

use std::sync::Arc;

use reconcile_core::{NetworkLink, RuntimeConditions, SubscriptionCollaborator, SyncError, SyncFrequency, SyncPolicy, SyncResult};

pub struct EligibilityGate {
    subscription: Option<Arc<dyn SubscriptionCollaborator>>,
}

impl EligibilityGate {
    pub fn new(subscription: Option<Arc<dyn SubscriptionCollaborator>>) -> Self {
        EligibilityGate { subscription }
    }

    /// Evaluated once at operation start, never mid-operation (spec §4.8).
    /// `explicit_invocation` distinguishes a caller-initiated sync from a
    /// scheduler tick, relevant only when `frequency = manual`.
    pub async fn check_eligibility(
        &self,
        user: Option<&str>,
        family: &str,
        policy: &SyncPolicy,
        conditions: RuntimeConditions,
        explicit_invocation: bool,
    ) -> SyncResult<()> {
        if !policy.enabled {
            return Err(SyncError::PolicyDisabled);
        }

        if !policy.admits_family(family) {
            return Err(SyncError::ConditionsNotMet {
                reason: format!("family {family} excluded by policy"),
            });
        }

        if policy.wifi_only && conditions.link != Some(NetworkLink::Wifi) {
            return Err(SyncError::ConditionsNotMet {
                reason: "wifi_only policy requires a wifi connection".to_string(),
            });
        }

        if !policy.allow_background_sync && conditions.is_background {
            return Err(SyncError::ConditionsNotMet {
                reason: "background sync is disabled by policy".to_string(),
            });
        }

        if policy.pause_on_low_battery {
            if let Some(level) = conditions.battery_level {
                if level < policy.minimum_battery_level {
                    return Err(SyncError::ConditionsNotMet {
                        reason: format!("battery {level} below minimum {}", policy.minimum_battery_level),
                    });
                }
            }
        }

        if matches!(policy.frequency, SyncFrequency::Manual) && !explicit_invocation {
            return Err(SyncError::ConditionsNotMet {
                reason: "frequency is manual; sync must be explicitly invoked".to_string(),
            });
        }

        for feature in &policy.required_features {
            let user = user.ok_or(SyncError::NotAuthenticated)?;
            if let Some(subscription) = &self.subscription {
                let has_access = subscription.validate_feature(feature, user).await?;
                if !has_access {
                    return Err(SyncError::SubscriptionRequired {
                        feature: feature.clone(),
                    });
                }
            } else {
                return Err(SyncError::SubscriptionRequired {
                    feature: feature.clone(),
                });
            }
        }

        Ok(())
    }
}
