//! Route resolver — determines which agent handles an inbound message.
//!
//! Pure function: no network or disk access. Given the configured bindings
//! and a single message's routing facts, decides which agent owns it.

use crate::config::schema::BindingConfig;
use crate::types::{MatchedBy, ResolvedRoute, RouteInput};

/// Resolve which agent should handle a message.
///
/// Priority cascade: peer match, then guild, then team, then account, then
/// channel wildcard, then the default agent. The first binding whose
/// `match` fires wins; bindings are checked in the order given.
pub fn resolve(bindings: &[BindingConfig], route_input: &RouteInput) -> ResolvedRoute {
    for binding in bindings {
        let m = &binding.match_;

        if let (Some(want), Some(got)) = (&m.peer, &route_input.peer) {
            let channel_ok = m.channel.is_empty() || m.channel == route_input.channel;
            if want.kind == got.kind && want.id == got.id && channel_ok {
                return build_route(&binding.agent_id, route_input, MatchedBy::Peer);
            }
        }

        if !m.guild_id.is_empty() && m.guild_id == route_input.guild_id {
            return build_route(&binding.agent_id, route_input, MatchedBy::Guild);
        }

        if !m.team_id.is_empty() && m.team_id == route_input.team_id {
            return build_route(&binding.agent_id, route_input, MatchedBy::Team);
        }

        if !m.account_id.is_empty() && m.account_id == route_input.account_id {
            return build_route(&binding.agent_id, route_input, MatchedBy::Account);
        }

        if !m.channel.is_empty()
            && m.channel == route_input.channel
            && m.peer.is_none()
            && m.account_id.is_empty()
        {
            return build_route(&binding.agent_id, route_input, MatchedBy::Channel);
        }
    }

    build_route("", route_input, MatchedBy::Default)
}

fn build_route(agent_id: &str, route_input: &RouteInput, matched_by: MatchedBy) -> ResolvedRoute {
    let agent_id = if agent_id.is_empty() { "default" } else { agent_id };
    ResolvedRoute {
        agent_id: agent_id.to_string(),
        channel: route_input.channel.clone(),
        account_id: route_input.account_id.clone(),
        session_key: format!(
            "agent:{agent_id}:{}:{}",
            route_input.channel, route_input.account_id
        ),
        main_session_key: format!("agent:{agent_id}:main"),
        matched_by,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::BindingMatch;
    use crate::types::RoutePeer;

    fn binding(agent_id: &str, m: BindingMatch) -> BindingConfig {
        BindingConfig {
            agent_id: agent_id.to_string(),
            match_: m,
        }
    }

    #[test]
    fn test_default_route_with_no_bindings() {
        let input = RouteInput {
            channel: "test".to_string(),
            account_id: "user1".to_string(),
            ..Default::default()
        };
        let route = resolve(&[], &input);
        assert_eq!(route.matched_by, MatchedBy::Default);
        assert_eq!(route.agent_id, "default");
    }

    #[test]
    fn test_channel_binding() {
        let bindings = vec![binding(
            "agent1",
            BindingMatch {
                channel: "telegram".to_string(),
                ..Default::default()
            },
        )];
        let input = RouteInput {
            channel: "telegram".to_string(),
            account_id: "user1".to_string(),
            ..Default::default()
        };
        let route = resolve(&bindings, &input);
        assert_eq!(route.agent_id, "agent1");
        assert_eq!(route.matched_by, MatchedBy::Channel);
    }

    #[test]
    fn test_peer_binding() {
        let bindings = vec![binding(
            "agent2",
            BindingMatch {
                channel: "discord".to_string(),
                peer: Some(RoutePeer {
                    kind: "direct".to_string(),
                    id: "user42".to_string(),
                }),
                ..Default::default()
            },
        )];
        let input = RouteInput {
            channel: "discord".to_string(),
            account_id: "user42".to_string(),
            peer: Some(RoutePeer {
                kind: "direct".to_string(),
                id: "user42".to_string(),
            }),
            ..Default::default()
        };
        let route = resolve(&bindings, &input);
        assert_eq!(route.agent_id, "agent2");
        assert_eq!(route.matched_by, MatchedBy::Peer);
    }

    #[test]
    fn test_guild_binding_beats_channel_wildcard_below_it() {
        let bindings = vec![
            binding(
                "guild-agent",
                BindingMatch {
                    guild_id: "g1".to_string(),
                    ..Default::default()
                },
            ),
            binding(
                "fallback-agent",
                BindingMatch {
                    channel: "discord".to_string(),
                    ..Default::default()
                },
            ),
        ];
        let input = RouteInput {
            channel: "discord".to_string(),
            guild_id: "g1".to_string(),
            ..Default::default()
        };
        let route = resolve(&bindings, &input);
        assert_eq!(route.agent_id, "guild-agent");
        assert_eq!(route.matched_by, MatchedBy::Guild);
    }

    #[test]
    fn test_account_binding_does_not_match_channel_wildcard_rule() {
        // A rule scoped to an accountId should not also satisfy the
        // channel-wildcard branch for a different account on the same channel.
        let bindings = vec![binding(
            "acct-agent",
            BindingMatch {
                channel: "slack".to_string(),
                account_id: "team-9".to_string(),
                ..Default::default()
            },
        )];
        let input = RouteInput {
            channel: "slack".to_string(),
            account_id: "team-1".to_string(),
            ..Default::default()
        };
        let route = resolve(&bindings, &input);
        assert_eq!(route.matched_by, MatchedBy::Default);
    }

    #[test]
    fn test_session_key_and_main_session_key_format() {
        let input = RouteInput {
            channel: "cli".to_string(),
            account_id: "local".to_string(),
            ..Default::default()
        };
        let route = resolve(&[], &input);
        assert_eq!(route.session_key, "agent:default:cli:local");
        assert_eq!(route.main_session_key, "agent:default:main");
    }
}
