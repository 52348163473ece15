use std::time::Duration;

use dsp_protocol::{MessageType, NegotiationState, ProcessId, ProtocolMessage, Role, decode};
use dsp_testkit::{MockSut, deliver, fixtures, snapshot};

#[tokio::test]
async fn acknowledges_and_records_delivered_messages() {
    let sut = MockSut::start(Role::Provider).await;
    sut.acknowledge(
        "/negotiations/sut-p/events",
        200,
        &snapshot("c1", "sut-p", NegotiationState::Accepted),
    )
    .await;

    let accept = ProtocolMessage::new(MessageType::Accept)
        .with_consumer_pid("c1")
        .with_provider_pid("sut-p");
    let status = deliver(&sut.base_url(), &accept, Role::Consumer).await;
    assert_eq!(status, 200);

    let seen = sut.wait_for(MessageType::Accept, Duration::from_secs(1)).await;
    assert_eq!(seen.process_id(Role::Provider), Some(&ProcessId::new("sut-p")));
    assert_eq!(sut.hits("/negotiations/sut-p/events").await, 1);
}

#[tokio::test]
async fn transient_failures_precede_the_acknowledgement() {
    let sut = MockSut::start(Role::Provider).await;
    sut.fail_times("/negotiations/request", 503, 1).await;
    sut.accept_initial_request("sut-p").await;

    let request = ProtocolMessage::new(MessageType::Request)
        .with_consumer_pid("c1")
        .with_offer_id(fixtures::OFFER_ID)
        .with_callback_address("http://tck/consumer");
    assert_eq!(deliver(&sut.base_url(), &request, Role::Consumer).await, 503);
    assert_eq!(deliver(&sut.base_url(), &request, Role::Consumer).await, 201);

    let received = sut.inner().received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
    assert_eq!(decode(&received[1].body).unwrap().message_type, MessageType::Request);
}

#[tokio::test]
async fn rejections_carry_an_error_document() {
    let sut = MockSut::start(Role::Consumer).await;
    sut.reject("/negotiations/c1/agreement", 400, "not accepted").await;

    let agreement = fixtures::agreement("c1", "p1");
    assert_eq!(deliver(&sut.base_url(), &agreement, Role::Provider).await, 400);
}
