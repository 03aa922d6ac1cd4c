use domain::Transition;

/// What a gateway status asks of the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayCommand {
    Apply(Transition),
    /// Record the event, leave the order alone.
    NoOp,
}

/// Maps the gateway's `transaction_status` / `fraud_status` pair to a
/// transition.
///
/// | status | fraud | command |
/// |---|---|---|
/// | capture | accept (or absent) | confirmPayment |
/// | capture | challenge | no-op |
/// | capture | deny | markFailed |
/// | settlement | any | confirmPayment |
/// | pending | any | no-op |
/// | deny, cancel, failure | any | markFailed |
/// | expire | any | expirePayment |
pub fn map_status(transaction_status: &str, fraud_status: Option<&str>) -> GatewayCommand {
    let status = transaction_status.trim().to_ascii_lowercase();
    let fraud = fraud_status.map(|f| f.trim().to_ascii_lowercase());

    match status.as_str() {
        "capture" => match fraud.as_deref() {
            None | Some("") | Some("accept") => GatewayCommand::Apply(Transition::ConfirmPayment),
            Some("deny") => GatewayCommand::Apply(Transition::MarkFailed),
            Some(_) => GatewayCommand::NoOp,
        },
        "settlement" => GatewayCommand::Apply(Transition::ConfirmPayment),
        "deny" | "cancel" | "failure" => GatewayCommand::Apply(Transition::MarkFailed),
        "expire" => GatewayCommand::Apply(Transition::ExpirePayment),
        _ => GatewayCommand::NoOp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_depends_on_fraud_status() {
        assert_eq!(
            map_status("capture", Some("accept")),
            GatewayCommand::Apply(Transition::ConfirmPayment)
        );
        assert_eq!(
            map_status("capture", None),
            GatewayCommand::Apply(Transition::ConfirmPayment)
        );
        assert_eq!(map_status("capture", Some("challenge")), GatewayCommand::NoOp);
        assert_eq!(
            map_status("capture", Some("deny")),
            GatewayCommand::Apply(Transition::MarkFailed)
        );
    }

    #[test]
    fn terminal_statuses() {
        assert_eq!(
            map_status("settlement", None),
            GatewayCommand::Apply(Transition::ConfirmPayment)
        );
        for status in ["deny", "cancel", "failure"] {
            assert_eq!(
                map_status(status, None),
                GatewayCommand::Apply(Transition::MarkFailed)
            );
        }
        assert_eq!(
            map_status("EXPIRE", None),
            GatewayCommand::Apply(Transition::ExpirePayment)
        );
    }

    #[test]
    fn pending_and_unknown_are_no_ops() {
        assert_eq!(map_status("pending", None), GatewayCommand::NoOp);
        assert_eq!(map_status("refund", None), GatewayCommand::NoOp);
    }
}
