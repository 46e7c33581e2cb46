//! End-to-end: two nameservers refer to each other for the same zone in a
//! cycle. The engine must detect the repeat (qname, NS set) and return
//! SERVFAIL rather than iterating forever.

mod common;

use std::net::Ipv4Addr;

use common::{drive_to_completion, rr_a, rr_ns, Harness};
use resolver::model::{Name, Rcode, CLASS_IN, TYPE_A};

#[test]
fn circular_referral_terminates_with_servfail() {
	let harness = Harness::new(1_000);
	let peer_a: std::net::IpAddr = "198.51.100.50".parse().unwrap();
	let peer_b: std::net::IpAddr = "198.51.100.51".parse().unwrap();

	harness.seed_ns("loop1.test", 3_600_000, &["ns.a.test"]);
	harness.seed_glue("ns.a.test", 3_600_000, Ipv4Addr::new(198, 51, 100, 50));

	harness.transport.borrow_mut().push_script(peer_a, |id, qname, qtype| {
		common::encode_response(id, &qname, qtype, 0, false, &[], &[rr_ns("loop1.test", 3600, "ns.b.test")], &[rr_a("ns.b.test", 3600, Ipv4Addr::new(198, 51, 100, 51))])
	});
	harness.transport.borrow_mut().push_script(peer_b, |id, qname, qtype| {
		common::encode_response(id, &qname, qtype, 0, false, &[], &[rr_ns("loop1.test", 3600, "ns.a.test")], &[rr_a("ns.a.test", 3600, Ipv4Addr::new(198, 51, 100, 50))])
	});

	let future = Box::pin(harness.engine.begin_resolve(Name::from("www.loop1.test"), TYPE_A, CLASS_IN));
	let answer = drive_to_completion(&harness, future, 1.0, 20);

	assert_eq!(answer.rcode, Rcode::ServFail);

	let transport = harness.transport.borrow();
	assert_eq!(transport.sent_count_to(peer_a), 1);
	assert_eq!(transport.sent_count_to(peer_b), 1);
	assert_eq!(transport.sent.len(), 2, "the been_there cycle check must stop the third hop before sending a query");
}
