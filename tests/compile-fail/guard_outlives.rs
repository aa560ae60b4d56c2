// A guard can't outlive the lock space it borrows from.

fn main() {
    let guard;
    {
        let space = dblatch::LockSpace::new(8);
        guard = space.read().unwrap();
    }
    drop(guard);
}
