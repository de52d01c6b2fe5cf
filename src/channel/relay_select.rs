//! Relay selection for the `init` push and the presence-debounced
//! `relays_presence` follow-up (§4.8).

use meridian_proto::relay::Relay;
use rand::seq::SliceRandom;

const EARTH_RADIUS_KM: f64 = 6371.0;

fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Pick up to two relays for a session at `session_coords`. Relays (or the
/// session) without coordinates score `+infinity` and sort last; if none of
/// the candidates have usable coordinates, two are chosen at random.
#[must_use]
pub fn select_relays<'a>(candidates: &'a [Relay], session_coords: Option<(f64, f64)>) -> Vec<&'a Relay> {
    let any_scored = session_coords.is_some() && candidates.iter().any(|r| r.coords.is_some());
    if !any_scored {
        let mut shuffled: Vec<&Relay> = candidates.iter().collect();
        shuffled.shuffle(&mut rand::thread_rng());
        shuffled.truncate(2);
        return shuffled;
    }

    let session = session_coords.unwrap();
    let mut scored: Vec<(f64, &Relay)> = candidates
        .iter()
        .map(|r| (r.coords.map_or(f64::INFINITY, |c| haversine_km(session, c)), r))
        .collect();
    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(2).map(|(_, r)| r).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_proto::RelayId;

    fn relay(coords: Option<(f64, f64)>) -> Relay {
        Relay { id: RelayId::new(), account_id: None, ipv4: None, ipv6: None, stamp_secret: "s".into(), coords }
    }

    #[test]
    fn picks_closest_two_by_distance_excluding_the_farthest() {
        let far = relay(Some((51.5, -0.1)));
        let near = relay(Some((40.0, -73.0)));
        let nearest = relay(Some((40.01, -73.01)));
        let candidates = vec![far.clone(), near.clone(), nearest.clone()];
        let selected = select_relays(&candidates, Some((40.0, -73.0)));
        let ids: Vec<_> = selected.iter().map(|r| r.id).collect();
        assert_eq!(selected.len(), 2);
        assert!(!ids.contains(&far.id));
    }

    #[test]
    fn nil_coords_sort_last() {
        let scored = relay(Some((40.0, -73.0)));
        let unscored = relay(None);
        let selected = select_relays(&[unscored.clone(), scored.clone()], Some((40.0, -73.0)));
        assert_eq!(selected[0].id, scored.id);
    }

    #[test]
    fn no_session_coords_selects_randomly_but_bounded_to_two() {
        let candidates: Vec<Relay> = (0..5).map(|_| relay(Some((1.0, 1.0)))).collect();
        let selected = select_relays(&candidates, None);
        assert_eq!(selected.len(), 2);
    }
}
