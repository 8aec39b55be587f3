//! Channel eligibility rules.

use crate::channel::Channel;
use crate::model::{ChannelPreferences, Frequency, Notification};

/// Decides whether a channel takes part in a delivery attempt.
///
/// All rules must pass, in order: the user has preferences for this
/// channel; the stored frequency matches `required_frequency` unless the
/// caller is the immediate-dispatch path (`instant`); the channel reports
/// itself configured for this user; and the channel supports the
/// notification's type.
pub fn is_eligible<C: Channel + ?Sized>(
    notification: &Notification,
    channel: &C,
    prefs: Option<&ChannelPreferences>,
    required_frequency: Frequency,
    instant: bool,
) -> bool {
    let Some(prefs) = prefs else {
        // no preferences for this channel
        return false;
    };

    if !instant && prefs.frequency != required_frequency {
        return false;
    }

    if !channel.is_configured(&notification.user_id, prefs) {
        // prefs not complete, e.g. recipient address missing
        return false;
    }

    if !channel
        .notification_types()
        .contains(&notification.notification_type)
    {
        // channel not applicable for type
        return false;
    }

    true
}
