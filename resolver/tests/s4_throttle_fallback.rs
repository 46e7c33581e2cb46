//! End-to-end: a zone with two nameserver addresses where the faster-rated
//! one times out. The engine must fall back to the second address within the
//! same resolution and leave the first one throttled afterward.

mod common;

use std::net::Ipv4Addr;

use common::{drive_to_completion, rr_a, Harness};
use resolver::model::{Name, Rcode, CLASS_IN, TYPE_A};

#[test]
fn timed_out_address_is_skipped_in_favor_of_the_other_and_then_throttled() {
	let harness = Harness::new(1_000);
	let a1: std::net::IpAddr = "198.51.100.30".parse().unwrap();
	let a2: std::net::IpAddr = "198.51.100.31".parse().unwrap();
	let target = Ipv4Addr::new(203, 0, 113, 40);

	harness.seed_ns("example.test", 3_600_000, &["ns1.example.test", "ns2.example.test"]);
	harness.seed_glue("ns1.example.test", 3_600_000, Ipv4Addr::new(198, 51, 100, 30));
	harness.seed_glue("ns2.example.test", 3_600_000, Ipv4Addr::new(198, 51, 100, 31));

	// bias the speed table so A1 sorts first and is tried before A2; A1 is
	// left unscripted (a blackhole) so it always times out, while A2 answers.
	{
		let mut storage = harness.engine.storage.borrow_mut();
		storage.nsspeeds.submit("ns1.example.test", a1, 50.0, 0.0);
		storage.nsspeeds.submit("ns2.example.test", a2, 5000.0, 0.0);
	}

	harness.transport.borrow_mut().push_script(a2, move |id, qname, qtype| common::encode_response(id, &qname, qtype, 0, true, &[rr_a("www.example.test", 300, target)], &[], &[]));

	let future = Box::pin(harness.engine.begin_resolve(Name::from("www.example.test"), TYPE_A, CLASS_IN));
	let answer = drive_to_completion(&harness, future, 2.0, 30);

	assert_eq!(answer.rcode, Rcode::NoError);
	assert!(matches!(answer.records.first().map(|rr| &rr.rdata), Some(resolver::model::RData::A(a)) if *a == target));

	assert_eq!(harness.transport.borrow().sent_count_to(a1), 1, "the slow address must still be tried first");
	assert_eq!(harness.transport.borrow().sent_count_to(a2), 1);

	let now = harness.clock.unix();
	let mut storage = harness.engine.storage.borrow_mut();
	assert!(storage.throttle.should_throttle(now, &(a1, "www.example.test".to_string(), TYPE_A)), "a1 must remain throttled after timing out");
	assert_eq!(storage.stats.outgoing_timeouts, 1);
}
