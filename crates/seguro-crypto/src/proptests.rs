use proptest::prelude::*;
use seguro_proto::{Meta, MessageKind, MessageRecord};

use crate::boxes::{CurveBox, GroupKey, PublicBox, SecretBox};
use crate::identity::IdentityKeys;
use crate::session::{Inbound, Session};
use crate::envelope::Envelope;

fn dm(id: u64, from: &str, blob: String) -> MessageRecord {
    MessageRecord {
        id,
        ts: id as f64,
        from: from.to_owned(),
        blob,
        meta: Meta::new(),
        kind: MessageKind::Dm,
        group_id: None,
    }
}

// Group "g1" [alice, bob, carol] created by alice: one distribution each for
// bob and carol, and only the addressee can open theirs.
#[test]
fn group_creation_distributes_to_other_members_only() {
    let mut alice = Session::new("alice", IdentityKeys::generate());
    let bob_keys = IdentityKeys::generate();
    let carol_keys = IdentityKeys::generate();
    let members = vec![
        ("alice".to_string(), alice.identity().public_bytes()),
        ("bob".to_string(), bob_keys.public_bytes()),
        ("carol".to_string(), carol_keys.public_bytes()),
    ];

    let dists = alice.group_key_distributions("g1", &members).unwrap();
    let mut addressees: Vec<_> = dists.iter().map(|d| d.member.as_str()).collect();
    addressees.sort_unstable();
    assert_eq!(addressees, ["bob", "carol"]);

    for dist in &dists {
        let env = Envelope::from_blob(&dist.blob).unwrap();
        assert_eq!(env.kind(), "group_key_distribution");
        let (own, other) = if dist.member == "bob" {
            (&bob_keys, &carol_keys)
        } else {
            (&carol_keys, &bob_keys)
        };
        assert!(env.open_group_key(own).is_ok());
        assert!(env.open_group_key(other).is_err());
    }
}

#[test]
fn every_member_reads_the_same_group_text() {
    let mut alice = Session::new("alice", IdentityKeys::generate());
    let mut bob = Session::new("bob", IdentityKeys::generate());
    let mut carol = Session::new("carol", IdentityKeys::generate());
    let members = vec![
        ("bob".to_string(), bob.identity().public_bytes()),
        ("carol".to_string(), carol.identity().public_bytes()),
    ];
    let dists = alice.group_key_distributions("g1", &members).unwrap();
    for dist in dists {
        let target = if dist.member == "bob" { &mut bob } else { &mut carol };
        target.open(&dm(1, "alice", dist.blob));
    }

    let blob = alice.seal_group("g1", "bom dia").unwrap();
    for session in [&mut bob, &mut carol] {
        let mut record = dm(2, "alice", blob.clone());
        record.kind = MessageKind::Group;
        record.group_id = Some("g1".into());
        assert_eq!(
            session.open(&record),
            Inbound::Chat {
                conversation: "g1".into(),
                from: "alice".into(),
                text: "bom dia".into()
            }
        );
    }
}

proptest! {
    #[test]
    fn curve_box_opens_what_it_seals(
        a in any::<[u8; 32]>(),
        b in any::<[u8; 32]>(),
        msg in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let alice = IdentityKeys::from_secret_bytes(a);
        let bob = IdentityKeys::from_secret_bytes(b);
        let sealed = CurveBox::new(&alice).seal(&bob.public_bytes(), &msg).unwrap();
        prop_assert_eq!(CurveBox::new(&bob).open(&alice.public_bytes(), &sealed).unwrap(), msg);
    }

    #[test]
    fn any_single_bit_flip_is_rejected(
        msg in prop::collection::vec(any::<u8>(), 1..128),
        pos in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let key = GroupKey::generate();
        let mut sealed = key.seal(&msg).unwrap();
        let i = pos.index(sealed.len());
        sealed[i] ^= 1 << bit;
        prop_assert!(key.open(&sealed).is_err());
    }

    #[test]
    fn arbitrary_blobs_never_panic_the_session(blob in "[A-Za-z0-9+/=]{0,200}") {
        let mut bob = Session::new("bob", IdentityKeys::generate());
        let inbound = bob.open(&dm(1, "mallory", blob));
        let is_undecryptable = matches!(inbound, Inbound::Undecryptable { .. });
        prop_assert!(is_undecryptable);
        prop_assert_eq!(bob.cursor(), 1);
    }
}
