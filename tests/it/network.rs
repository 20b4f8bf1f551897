use mindoodb::cas::{Cas, InMemoryCas};
use mindoodb::collaborators::{CryptoProvider, DefaultCrypto, InMemoryDirectory};
use mindoodb::config::AuthServiceConfig;
use mindoodb::network::client::{ClientCasAdapter, Transport};
use mindoodb::network::protocol::{Request, Response};
use mindoodb::network::server::ServerCasAdapter;
use mindoodb::network::AuthService;
use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey};
use std::sync::Arc;

struct InProcessTransport {
    adapter: ServerCasAdapter,
}

impl Transport for InProcessTransport {
    fn send(&self, request: Request) -> mindoodb::Result<Response> {
        Ok(self.adapter.handle(request))
    }
}

/// End-to-end: a client authenticates, writes an entry, and reads it back with the RSA
/// transport layer unwrapped, exercising auth + server adapter + client adapter together.
#[test]
fn client_round_trips_an_entry_through_the_server_adapter() {
    let (signing_key, verifying_key) = DefaultCrypto::generate_signing_keypair();
    let mut rng = rand::thread_rng();
    let rsa_private = rsa::RsaPrivateKey::new(&mut rng, 2048).unwrap();
    let rsa_public = rsa::RsaPublicKey::from(&rsa_private);
    let rsa_public_der = rsa_public.to_pkcs1_der().unwrap().as_bytes().to_vec();
    let rsa_private_der = rsa_private.to_pkcs1_der().unwrap().as_bytes().to_vec();

    let directory = Arc::new(InMemoryDirectory::new());
    let public_key = DefaultCrypto::format_public_key(&verifying_key);
    directory.add_user("alice", public_key.clone(), rsa_public_der);

    let cas: Arc<dyn Cas> = Arc::new(InMemoryCas::new("db1"));
    let auth = Arc::new(AuthService::new(directory.clone(), AuthServiceConfig::new("tenant-a", "secret")));
    let crypto: Arc<dyn CryptoProvider> = Arc::new(DefaultCrypto::new());
    let adapter = ServerCasAdapter::new(cas, auth, directory, crypto);
    let transport = Box::new(InProcessTransport { adapter });

    let client = ClientCasAdapter::new(
        transport,
        Box::new(DefaultCrypto::new()),
        "alice",
        Box::new(move |bytes| DefaultCrypto::sign(&signing_key, bytes)),
        rsa_private_der,
    );

    use mindoodb::entry::{DocEntryBuilder, EntryType};
    let entry = DocEntryBuilder::new(
        EntryType::DocCreate,
        "doc1",
        "c1",
        vec![],
        vec![],
        1,
        public_key,
        "key1",
    )
    .unwrap()
    .build(vec![1, 2, 3], vec![9], 3);

    client.put_entries(vec![entry.clone()]).unwrap();
    let ids = client.get_all_ids().unwrap();
    assert_eq!(ids, vec![entry.id().clone()]);

    let fetched = client.get_entries(ids).unwrap();
    assert_eq!(fetched, vec![entry]);
}

#[test]
fn envelope_round_trips_a_join_request_uri() {
    use mindoodb::network::envelope::{decode, encode};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct JoinRequest {
        v: i32,
        db_id: String,
    }

    let payload = JoinRequest { v: 1, db_id: "db1".into() };
    let uri = encode("join_request", &payload).unwrap();
    let decoded: JoinRequest = decode("join_request", &uri).unwrap();
    assert_eq!(payload, decoded);
}
